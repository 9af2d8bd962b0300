//! The chess board: grid state, move execution, and board-file I/O.
//!
//! This is the engine's single source of truth for what a legal move is.
//! Nothing above this module (the game record, the stores, the protocol
//! session) re-implements any chess rule; they only interpret the typed
//! outcomes this module returns.

use std::fmt;

use crate::movegen::{self, CandidateMove};
use crate::types::*;

/// The 8×8 grid plus the per-game state a move needs to be validated:
/// whose turn it is, the en-passant target (if any), castling rights, and
/// whether a pawn is sitting on the back rank awaiting promotion.
#[derive(Debug, Clone)]
pub struct Board {
    squares: [Option<Piece>; 64],
    white_pieces: Vec<Square>,
    black_pieces: Vec<Square>,
    pub turn: Color,
    pub en_passant: Option<Square>,
    pub castling: CastlingRights,
    /// Set to the pawn's square immediately after it reaches the back rank
    /// and before the player has chosen what to promote it to. No move is
    /// legal for the mover while this is `Some`.
    pub promotion_pending: Option<Square>,
}

/// The result of attempting a move against a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    MovedNormally,
    MovedPromotionRequired,
    Invalid,
    WrongTurn,
    MustPromoteFirst,
}

/// The result of attempting to resolve a pending promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteOutcome {
    Ok,
    NoPromotionPending,
    InvalidPieceChar,
}

/// A value written into (or read from) a board-file line: either an
/// integer flag or a raw row string. Modeled as a tagged sum rather than a
/// language-level "any" so callers can't accidentally treat an int as a
/// string or vice versa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Int(i32),
    Str(String),
}

/// A board file failed to parse. Carries a human-readable reason; the
/// board is never constructed in a partially-valid state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardLoadError(pub String);

impl fmt::Display for BoardLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "corrupt board file: {}", self.0)
    }
}

impl std::error::Error for BoardLoadError {}

impl Board {
    /// An empty board: White to move, full castling rights, no en passant.
    pub fn empty() -> Self {
        Self {
            squares: [None; 64],
            white_pieces: Vec::new(),
            black_pieces: Vec::new(),
            turn: Color::White,
            en_passant: None,
            castling: CastlingRights::default(),
            promotion_pending: None,
        }
    }

    /// The standard chess starting position.
    pub fn standard_starting() -> Self {
        let mut board = Self::empty();
        let back_rank = [
            PieceKind::Rook, PieceKind::Knight, PieceKind::Bishop, PieceKind::Queen,
            PieceKind::King, PieceKind::Bishop, PieceKind::Knight, PieceKind::Rook,
        ];
        for (column, kind) in back_rank.iter().enumerate() {
            board.set(Square::new(0, column as u8), Some(Piece::new(*kind, Color::White)));
            board.set(Square::new(7, column as u8), Some(Piece::new(*kind, Color::Black)));
        }
        for column in 0..8u8 {
            board.set(Square::new(1, column), Some(Piece::new(PieceKind::Pawn, Color::White)));
            board.set(Square::new(6, column), Some(Piece::new(PieceKind::Pawn, Color::Black)));
        }
        board
    }

    pub fn get(&self, sq: Square) -> Option<Piece> {
        self.squares[sq.index()]
    }

    /// Sets (or clears) a cell, keeping the per-color piece lists in sync
    /// so the grid and the lists agree at rest, as the data model requires.
    pub fn set(&mut self, sq: Square, piece: Option<Piece>) {
        if let Some(old) = self.squares[sq.index()] {
            self.list_for_mut(old.color).retain(|&s| s != sq);
        }
        self.squares[sq.index()] = piece;
        if let Some(p) = piece {
            self.list_for_mut(p.color).push(sq);
        }
    }

    fn list_for_mut(&mut self, color: Color) -> &mut Vec<Square> {
        match color {
            Color::White => &mut self.white_pieces,
            Color::Black => &mut self.black_pieces,
        }
    }

    /// The live pieces of one color, as `(square, piece)` pairs.
    pub fn pieces(&self, color: Color) -> Vec<(Square, Piece)> {
        let list = match color {
            Color::White => &self.white_pieces,
            Color::Black => &self.black_pieces,
        };
        list.iter()
            .map(|&sq| (sq, self.get(sq).expect("piece list out of sync with grid")))
            .collect()
    }

    pub fn find_king(&self, color: Color) -> Option<Square> {
        self.pieces(color)
            .into_iter()
            .find(|(_, p)| p.kind == PieceKind::King)
            .map(|(sq, _)| sq)
    }

    /// Every grid cell agrees with exactly one entry in a color list, and
    /// vice versa. Used by tests to assert the data-model invariant holds.
    #[cfg(test)]
    pub fn lists_agree_with_grid(&self) -> bool {
        let mut count = 0;
        for row in 0..8u8 {
            for column in 0..8u8 {
                let sq = Square::new(row, column);
                if let Some(piece) = self.get(sq) {
                    count += 1;
                    let list = match piece.color {
                        Color::White => &self.white_pieces,
                        Color::Black => &self.black_pieces,
                    };
                    if !list.contains(&sq) {
                        return false;
                    }
                }
            }
        }
        count == self.white_pieces.len() + self.black_pieces.len()
    }

    pub fn legal_moves(&self) -> Vec<CandidateMove> {
        movegen::generate_legal_moves(self, self.turn, &self.castling, self.en_passant)
    }

    pub fn is_check(&self, color: Color) -> bool {
        movegen::is_in_check(self, color)
    }

    pub fn is_checkmate(&self, color: Color) -> bool {
        self.is_check(color)
            && movegen::generate_legal_moves(self, color, &self.castling, self.en_passant).is_empty()
    }

    pub fn is_stalemate(&self) -> bool {
        !self.is_check(self.turn)
            && movegen::generate_legal_moves(self, self.turn, &self.castling, self.en_passant).is_empty()
    }

    /// Attempts to move the piece on `src` to `dest`.
    pub fn move_piece(&mut self, src: Square, dest: Square) -> MoveOutcome {
        if self.promotion_pending.is_some() {
            return MoveOutcome::MustPromoteFirst;
        }
        let piece = match self.get(src) {
            Some(p) => p,
            None => return MoveOutcome::Invalid,
        };
        if piece.color != self.turn {
            return MoveOutcome::WrongTurn;
        }

        let legal = self.legal_moves();
        let candidate = match legal.into_iter().find(|m| m.from == src && m.to == dest) {
            Some(m) => m,
            None => return MoveOutcome::Invalid,
        };

        let is_pawn = piece.kind == PieceKind::Pawn;
        movegen::apply_candidate_to_grid(self, &candidate, self.turn);
        self.update_castling_rights(&candidate);

        self.en_passant = None;
        if is_pawn && (dest.row as i8 - src.row as i8).abs() == 2 {
            let ep_row = (src.row as i8 + self.turn.pawn_direction()) as u8;
            self.en_passant = Some(Square::new(ep_row, src.column));
        }

        if candidate.is_promotion {
            self.promotion_pending = Some(dest);
            return MoveOutcome::MovedPromotionRequired;
        }

        self.turn = self.turn.opponent();
        MoveOutcome::MovedNormally
    }

    fn update_castling_rights(&mut self, mv: &CandidateMove) {
        if let Some(piece) = self.get(mv.to)
            && piece.kind == PieceKind::King
        {
            let rights = self.castling.for_color_mut(piece.color);
            rights.kingside = false;
            rights.queenside = false;
        }

        let clear_for_rook_square = |sq: Square, castling: &mut CastlingRights| {
            if sq == Square::new(0, 7) {
                castling.white.kingside = false;
            }
            if sq == Square::new(0, 0) {
                castling.white.queenside = false;
            }
            if sq == Square::new(7, 7) {
                castling.black.kingside = false;
            }
            if sq == Square::new(7, 0) {
                castling.black.queenside = false;
            }
        };
        clear_for_rook_square(mv.from, &mut self.castling);
        clear_for_rook_square(mv.to, &mut self.castling);
    }

    /// Resolves a pending promotion with the chosen piece kind
    /// (`r`, `n`, `b`, or `q`, case-insensitive).
    pub fn promote(&mut self, kind_char: char) -> PromoteOutcome {
        let sq = match self.promotion_pending {
            Some(sq) => sq,
            None => return PromoteOutcome::NoPromotionPending,
        };
        let kind = match PieceKind::from_promotion_char(kind_char) {
            Some(k) => k,
            None => return PromoteOutcome::InvalidPieceChar,
        };
        let color = self.turn;
        self.set(sq, Some(Piece::new(kind, color)));
        self.promotion_pending = None;
        self.turn = color.opponent();
        PromoteOutcome::Ok
    }

    /// Emits this board's contents as the 13 board-file fields, in order:
    /// 4 castling-right ints, 8 row strings (Black's back rank first), 1
    /// side-to-move int.
    pub fn save_data(&self) -> Vec<Field> {
        let mut fields = Vec::with_capacity(13);
        fields.push(Field::Int(self.castling.white.kingside as i32));
        fields.push(Field::Int(self.castling.black.kingside as i32));
        fields.push(Field::Int(self.castling.white.queenside as i32));
        fields.push(Field::Int(self.castling.black.queenside as i32));

        for row in (0..8u8).rev() {
            let mut line = String::with_capacity(8);
            for column in 0..8u8 {
                let sq = Square::new(row, column);
                let ch = if self.en_passant == Some(sq) {
                    'e'
                } else {
                    match self.get(sq) {
                        Some(piece) => piece.to_char(),
                        None => 'x',
                    }
                };
                line.push(ch);
            }
            fields.push(Field::Str(line));
        }

        fields.push(Field::Int(match self.turn {
            Color::White => 0,
            Color::Black => 1,
        }));
        fields
    }

    /// Writes the board-file representation, one field per line, LF-terminated.
    pub fn save_to(&self, writer: &mut impl std::io::Write) -> std::io::Result<()> {
        for field in self.save_data() {
            match field {
                Field::Int(n) => writeln!(writer, "{}", n)?,
                Field::Str(s) => writeln!(writer, "{}", s)?,
            }
        }
        Ok(())
    }

    /// Parses a 13-line board file. Rejects anything that doesn't round-trip.
    pub fn load(lines: &[String]) -> Result<Board, BoardLoadError> {
        if lines.len() != 13 {
            return Err(BoardLoadError(format!("expected 13 lines, found {}", lines.len())));
        }

        let flag = |s: &str| -> Result<bool, BoardLoadError> {
            match s {
                "0" => Ok(false),
                "1" => Ok(true),
                other => Err(BoardLoadError(format!("expected 0 or 1, found {:?}", other))),
            }
        };

        let mut board = Board::empty();
        board.castling.white.kingside = flag(lines[0].trim())?;
        board.castling.black.kingside = flag(lines[1].trim())?;
        board.castling.white.queenside = flag(lines[2].trim())?;
        board.castling.black.queenside = flag(lines[3].trim())?;

        let mut en_passant_found = None;
        for (line_idx, row) in (0..8u8).rev().enumerate() {
            let line = &lines[4 + line_idx];
            let chars: Vec<char> = line.chars().collect();
            if chars.len() != 8 {
                return Err(BoardLoadError(format!(
                    "row line {} has {} characters, expected 8",
                    4 + line_idx,
                    chars.len()
                )));
            }
            for (column, ch) in chars.into_iter().enumerate() {
                let sq = Square::new(row, column as u8);
                if ch == 'x' {
                    continue;
                }
                if ch == 'e' {
                    if en_passant_found.is_some() {
                        return Err(BoardLoadError("multiple en-passant markers".to_string()));
                    }
                    en_passant_found = Some(sq);
                    continue;
                }
                match Piece::from_char(ch) {
                    Some(piece) => board.set(sq, Some(piece)),
                    None => return Err(BoardLoadError(format!("invalid piece character {:?}", ch))),
                }
            }
        }
        board.en_passant = en_passant_found;

        board.turn = match flag(lines[12].trim())? {
            false => Color::White,
            true => Color::Black,
        };

        Ok(board)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_board_round_trips_byte_for_byte() {
        let board = Board::standard_starting();
        let mut buf = Vec::new();
        board.save_to(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        let lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();

        let reloaded = Board::load(&lines).unwrap();
        let mut buf2 = Vec::new();
        reloaded.save_to(&mut buf2).unwrap();
        assert_eq!(buf, buf2);
    }

    #[test]
    fn corrupt_board_file_is_rejected() {
        let bad_lines = vec!["0".to_string(); 12]; // 12, not 13
        assert!(Board::load(&bad_lines).is_err());
    }

    #[test]
    fn piece_lists_agree_with_grid_after_moves() {
        let mut board = Board::standard_starting();
        assert!(board.lists_agree_with_grid());
        board.move_piece(Square::new(1, 4), Square::new(3, 4));
        assert!(board.lists_agree_with_grid());
        board.move_piece(Square::new(6, 4), Square::new(4, 4));
        assert!(board.lists_agree_with_grid());
    }

    #[test]
    fn promotion_requires_second_step_then_flips_turn() {
        let mut board = Board::empty();
        board.set(Square::new(0, 4), Some(Piece::new(PieceKind::King, Color::White)));
        board.set(Square::new(7, 4), Some(Piece::new(PieceKind::King, Color::Black)));
        board.set(Square::new(6, 0), Some(Piece::new(PieceKind::Pawn, Color::White)));

        let outcome = board.move_piece(Square::new(6, 0), Square::new(7, 0));
        assert_eq!(outcome, MoveOutcome::MovedPromotionRequired);
        assert_eq!(board.turn, Color::White); // side-to-move has not flipped yet

        // No other move is legal until the promotion is resolved.
        assert_eq!(board.move_piece(Square::new(0, 4), Square::new(0, 3)), MoveOutcome::MustPromoteFirst);

        let promote_outcome = board.promote('q');
        assert_eq!(promote_outcome, PromoteOutcome::Ok);
        assert_eq!(board.get(Square::new(7, 0)).unwrap().kind, PieceKind::Queen);
        assert_eq!(board.turn, Color::Black);
    }

    #[test]
    fn promote_without_pending_promotion_is_rejected() {
        let mut board = Board::standard_starting();
        assert_eq!(board.promote('q'), PromoteOutcome::NoPromotionPending);
    }

    #[test]
    fn checkmate_implies_check_and_no_legal_moves() {
        // Fool's mate position: Black has just delivered checkmate.
        let mut board = Board::standard_starting();
        assert_eq!(board.move_piece(Square::new(1, 5), Square::new(2, 5)), MoveOutcome::MovedNormally);
        assert_eq!(board.move_piece(Square::new(6, 4), Square::new(4, 4)), MoveOutcome::MovedNormally);
        assert_eq!(board.move_piece(Square::new(1, 6), Square::new(3, 6)), MoveOutcome::MovedNormally);
        assert_eq!(board.move_piece(Square::new(7, 3), Square::new(3, 7)), MoveOutcome::MovedNormally);

        assert!(board.is_checkmate(Color::White));
        assert!(board.is_check(Color::White));
        assert!(board.legal_moves().is_empty());
    }
}


