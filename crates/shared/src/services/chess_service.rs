use chess::{Board, BoardStatus, ChessMove, MoveGen, Piece, Square};
use std::str::FromStr;

use crate::models::game::Color;
use crate::services::errors::chess_service_errors::ChessServiceError;

/// Thin wrapper around the rules library. The coordinator never reasons
/// about chess itself; every legality and game-over question goes through
/// here.
#[derive(Clone)]
pub struct ChessService;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameOutcome {
    Ongoing,
    Checkmate { winner: Color },
    Stalemate,
}

impl ChessService {
    /// Replay a coordinate-notation history ("e2e4", "e7e8q", ...) from the
    /// start position.
    pub fn position_from_history(history: &[String]) -> Result<Board, ChessServiceError> {
        let mut board = Board::default();
        for (i, notation) in history.iter().enumerate() {
            let (from, to, promotion) = Self::split_notation(notation).ok_or_else(|| {
                ChessServiceError::InvalidPosition(format!(
                    "Unparseable half-move {} at index {}",
                    notation, i
                ))
            })?;
            board = Self::try_move(&board, from, to, promotion).map_err(|e| {
                ChessServiceError::InvalidPosition(format!(
                    "History replay failed at index {}: {}",
                    i, e
                ))
            })?;
        }
        Ok(board)
    }

    /// Validate one move against the position and return the new position.
    pub fn try_move(
        board: &Board,
        from: &str,
        to: &str,
        promotion: Option<char>,
    ) -> Result<Board, ChessServiceError> {
        let from_sq = Square::from_str(from)
            .map_err(|_| ChessServiceError::ValidationError("Invalid from square".to_string()))?;
        let to_sq = Square::from_str(to)
            .map_err(|_| ChessServiceError::ValidationError("Invalid to square".to_string()))?;
        let promotion = match promotion {
            Some(p) => Some(Self::promotion_piece(p)?),
            None => None,
        };

        let chess_move = ChessMove::new(from_sq, to_sq, promotion);

        if !MoveGen::new_legal(board).any(|m| m == chess_move) {
            return Err(ChessServiceError::IllegalMove(
                "Move is not legal".to_string(),
            ));
        }

        Ok(board.make_move_new(chess_move))
    }

    pub fn side_to_move(board: &Board) -> Color {
        match board.side_to_move() {
            chess::Color::White => Color::White,
            chess::Color::Black => Color::Black,
        }
    }

    pub fn game_outcome(board: &Board) -> GameOutcome {
        match board.status() {
            BoardStatus::Ongoing => GameOutcome::Ongoing,
            BoardStatus::Stalemate => GameOutcome::Stalemate,
            BoardStatus::Checkmate => GameOutcome::Checkmate {
                // The side to move is mated.
                winner: Self::side_to_move(board).opposite(),
            },
        }
    }

    pub fn is_valid_square(square: &str) -> bool {
        Square::from_str(square).is_ok()
    }

    pub fn is_valid_promotion(piece: char) -> bool {
        matches!(piece, 'q' | 'r' | 'b' | 'n')
    }

    /// Coordinate notation for a committed half-move.
    pub fn notation(from: &str, to: &str, promotion: Option<char>) -> String {
        match promotion {
            Some(p) => format!("{}{}{}", from, to, p),
            None => format!("{}{}", from, to),
        }
    }

    fn promotion_piece(p: char) -> Result<Piece, ChessServiceError> {
        match p {
            'q' => Ok(Piece::Queen),
            'r' => Ok(Piece::Rook),
            'b' => Ok(Piece::Bishop),
            'n' => Ok(Piece::Knight),
            _ => Err(ChessServiceError::ValidationError(
                "Invalid promotion piece".to_string(),
            )),
        }
    }

    fn split_notation(notation: &str) -> Option<(&str, &str, Option<char>)> {
        if !notation.is_ascii() {
            return None;
        }
        match notation.len() {
            4 => Some((&notation[0..2], &notation[2..4], None)),
            5 => {
                let promotion = notation.chars().nth(4)?;
                Some((&notation[0..2], &notation[2..4], Some(promotion)))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moves(list: &[&str]) -> Vec<String> {
        list.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn replays_history_and_tracks_side_to_move() {
        let board = ChessService::position_from_history(&moves(&["e2e4", "e7e5"])).unwrap();
        assert_eq!(ChessService::side_to_move(&board), Color::White);
        assert_eq!(ChessService::game_outcome(&board), GameOutcome::Ongoing);
    }

    #[test]
    fn rejects_illegal_moves() {
        let board = Board::default();
        let err = ChessService::try_move(&board, "e2", "e5", None).unwrap_err();
        assert!(matches!(err, ChessServiceError::IllegalMove(_)));
    }

    #[test]
    fn rejects_garbage_squares_and_promotions() {
        let board = Board::default();
        assert!(ChessService::try_move(&board, "z9", "e4", None).is_err());
        assert!(ChessService::try_move(&board, "e2", "e4", Some('k')).is_err());
        assert!(!ChessService::is_valid_square("j1"));
        assert!(ChessService::is_valid_square("a8"));
        assert!(ChessService::is_valid_promotion('q'));
        assert!(!ChessService::is_valid_promotion('p'));
    }

    #[test]
    fn detects_fools_mate() {
        let board =
            ChessService::position_from_history(&moves(&["f2f3", "e7e5", "g2g4", "d8h4"])).unwrap();
        assert_eq!(
            ChessService::game_outcome(&board),
            GameOutcome::Checkmate {
                winner: Color::Black
            }
        );
    }

    #[test]
    fn detects_stalemate() {
        // Shortest known stalemate (Sam Loyd line).
        let history = moves(&[
            "e2e3", "a7a5", "d1h5", "a8a6", "h5a5", "h7h5", "h2h4", "a6h6", "a5c7", "f7f6",
            "c7d7", "e8f7", "d7b7", "d8d3", "b7b8", "d3h7", "b8c8", "f7g6", "c8e6",
        ]);
        let board = ChessService::position_from_history(&history).unwrap();
        assert_eq!(ChessService::game_outcome(&board), GameOutcome::Stalemate);
    }

    #[test]
    fn promotion_moves_replay() {
        let history = moves(&[
            "g2g4", "h7h5", "g4h5", "g7g6", "h5g6", "f8h6", "g6g7", "h6f4", "g7h8q",
        ]);
        let board = ChessService::position_from_history(&history).unwrap();
        assert_eq!(ChessService::side_to_move(&board), Color::Black);
    }

    #[test]
    fn invalid_history_fails_closed() {
        let err = ChessService::position_from_history(&moves(&["e2e4", "nonsense"])).unwrap_err();
        assert!(matches!(err, ChessServiceError::InvalidPosition(_)));
    }

    #[test]
    fn notation_roundtrip() {
        assert_eq!(ChessService::notation("e2", "e4", None), "e2e4");
        assert_eq!(ChessService::notation("e7", "e8", Some('q')), "e7e8q");
    }
}
