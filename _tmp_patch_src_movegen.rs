//! Pseudo-legal move generation and attack detection.
//!
//! These are pure functions over a [`crate::board::Board`] grid: they know
//! piece movement patterns and whether a square is attacked, but nothing
//! about whose turn it conceptually "counts" as once a move is chosen — that
//! bookkeeping (promotion pending, castling-rights updates, en passant
//! lifetime) lives in `board.rs`, which calls into this module to generate
//! candidates and to filter them down to legal moves.

use crate::board::Board;
use crate::types::*;

/// A candidate move before it has been checked for legality.
///
/// Promotion is represented only as a flag here — which piece the pawn
/// becomes is chosen afterward via the two-phase `promote` operation, not
/// bundled into the move itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateMove {
    pub from: Square,
    pub to: Square,
    pub is_castling: bool,
    pub is_en_passant: bool,
    pub is_promotion: bool,
}

impl CandidateMove {
    fn simple(from: Square, to: Square) -> Self {
        Self {
            from,
            to,
            is_castling: false,
            is_en_passant: false,
            is_promotion: false,
        }
    }
}

const ROOK_DIRS: [(i8, i8); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
const BISHOP_DIRS: [(i8, i8); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];
const QUEEN_DIRS: [(i8, i8); 8] = [
    (-1, 0), (1, 0), (0, -1), (0, 1),
    (-1, -1), (-1, 1), (1, -1), (1, 1),
];
const KNIGHT_OFFSETS: [(i8, i8); 8] = [
    (-2, -1), (-2, 1), (-1, -2), (-1, 2),
    (1, -2), (1, 2), (2, -1), (2, 1),
];

/// Returns `true` if any piece of `attacker_color` attacks `sq`.
///
/// Used both for check detection (is the king attacked?) and for castling
/// validation (the king may not cross or land on an attacked square).
pub fn is_square_attacked(board: &Board, sq: Square, attacker_color: Color) -> bool {
    for &(dr, dc) in &KNIGHT_OFFSETS {
        if let Some(from) = sq.offset(dr, dc)
            && let Some(piece) = board.get(from)
            && piece.color == attacker_color
            && piece.kind == PieceKind::Knight
        {
            return true;
        }
    }

    for dr in -1..=1i8 {
        for dc in -1..=1i8 {
            if dr == 0 && dc == 0 {
                continue;
            }
            if let Some(from) = sq.offset(dr, dc)
                && let Some(piece) = board.get(from)
                && piece.color == attacker_color
                && piece.kind == PieceKind::King
            {
                return true;
            }
        }
    }

    let pawn_dir: i8 = match attacker_color {
        Color::White => 1,
        Color::Black => -1,
    };
    for dc in [-1i8, 1] {
        if let Some(from) = sq.offset(-pawn_dir, dc)
            && let Some(piece) = board.get(from)
            && piece.color == attacker_color
            && piece.kind == PieceKind::Pawn
        {
            return true;
        }
    }

    for &(dr, dc) in &BISHOP_DIRS {
        if ray_hits(board, sq, dr, dc, attacker_color, &[PieceKind::Bishop, PieceKind::Queen]) {
            return true;
        }
    }
    for &(dr, dc) in &ROOK_DIRS {
        if ray_hits(board, sq, dr, dc, attacker_color, &[PieceKind::Rook, PieceKind::Queen]) {
            return true;
        }
    }

    false
}

fn ray_hits(
    board: &Board,
    from: Square,
    dr: i8,
    dc: i8,
    attacker_color: Color,
    kinds: &[PieceKind],
) -> bool {
    let mut cur = from;
    while let Some(next) = cur.offset(dr, dc) {
        if let Some(piece) = board.get(next) {
            return piece.color == attacker_color && kinds.contains(&piece.kind);
        }
        cur = next;
    }
    false
}

/// Returns `true` if `color`'s king is currently attacked.
pub fn is_in_check(board: &Board, color: Color) -> bool {
    match board.find_king(color) {
        Some(king_sq) => is_square_attacked(board, king_sq, color.opponent()),
        None => false,
    }
}

/// Generates pseudo-legal moves (piece movement rules only, ignoring
/// whether the move leaves the mover's own king in check).
pub fn generate_pseudo_legal_moves(
    board: &Board,
    turn: Color,
    castling: &CastlingRights,
    en_passant: Option<Square>,
) -> Vec<CandidateMove> {
    let mut moves = Vec::with_capacity(64);
    for row in 0..8u8 {
        for column in 0..8u8 {
            let from = Square::new(row, column);
            let piece = match board.get(from) {
                Some(p) if p.color == turn => p,
                _ => continue,
            };
            match piece.kind {
                PieceKind::King => generate_king_moves(board, from, turn, castling, &mut moves),
                PieceKind::Queen => generate_sliding_moves(board, from, turn, &QUEEN_DIRS, &mut moves),
                PieceKind::Rook => generate_sliding_moves(board, from, turn, &ROOK_DIRS, &mut moves),
                PieceKind::Bishop => generate_sliding_moves(board, from, turn, &BISHOP_DIRS, &mut moves),
                PieceKind::Knight => generate_knight_moves(board, from, turn, &mut moves),
                PieceKind::Pawn => generate_pawn_moves(board, from, turn, en_passant, &mut moves),
            }
        }
    }
    moves
}

fn generate_sliding_moves(
    board: &Board,
    from: Square,
    color: Color,
    directions: &[(i8, i8)],
    moves: &mut Vec<CandidateMove>,
) {
    for &(dr, dc) in directions {
        let mut cur = from;
        while let Some(to) = cur.offset(dr, dc) {
            match board.get(to) {
                None => {
                    moves.push(CandidateMove::simple(from, to));
                    cur = to;
                }
                Some(target) => {
                    if target.color != color {
                        moves.push(CandidateMove::simple(from, to));
                    }
                    break;
                }
            }
        }
    }
}

fn generate_knight_moves(board: &Board, from: Square, color: Color, moves: &mut Vec<CandidateMove>) {
    for &(dr, dc) in &KNIGHT_OFFSETS {
        if let Some(to) = from.offset(dr, dc) {
            match board.get(to) {
                None => moves.push(CandidateMove::simple(from, to)),
                Some(target) if target.color != color => moves.push(CandidateMove::simple(from, to)),
                Some(_) => {}
            }
        }
    }
}

fn generate_king_moves(
    board: &Board,
    from: Square,
    color: Color,
    castling: &CastlingRights,
    moves: &mut Vec<CandidateMove>,
) {
    for dr in -1..=1i8 {
        for dc in -1..=1i8 {
            if dr == 0 && dc == 0 {
                continue;
            }
            if let Some(to) = from.offset(dr, dc) {
                match board.get(to) {
                    None => moves.push(CandidateMove::simple(from, to)),
                    Some(target) if target.color != color => moves.push(CandidateMove::simple(from, to)),
                    Some(_) => {}
                }
            }
        }
    }

    let rights = castling.for_color(color);
    let row = color.back_row();
    let king_start = Square::new(row, 4);
    if from != king_start {
        return;
    }
    if is_square_attacked(board, from, color.opponent()) {
        return;
    }

    if rights.kingside {
        let f_sq = Square::new(row, 5);
        let g_sq = Square::new(row, 6);
        let rook_sq = Square::new(row, 7);
        let path_clear = board.get(f_sq).is_none() && board.get(g_sq).is_none();
        let rook_present = matches!(
            board.get(rook_sq),
            Some(Piece { kind: PieceKind::Rook, color: c }) if c == color
        );
        let safe = !is_square_attacked(board, f_sq, color.opponent())
            && !is_square_attacked(board, g_sq, color.opponent());
        if path_clear && rook_present && safe {
            moves.push(CandidateMove {
                from,
                to: g_sq,
                is_castling: true,
                is_en_passant: false,
                is_promotion: false,
            });
        }
    }

    if rights.queenside {
        let d_sq = Square::new(row, 3);
        let c_sq = Square::new(row, 2);
        let b_sq = Square::new(row, 1);
        let rook_sq = Square::new(row, 0);
        let path_clear = board.get(d_sq).is_none() && board.get(c_sq).is_none() && board.get(b_sq).is_none();
        let rook_present = matches!(
            board.get(rook_sq),
            Some(Piece { kind: PieceKind::Rook, color: c }) if c == color
        );
        let safe = !is_square_attacked(board, d_sq, color.opponent())
            && !is_square_attacked(board, c_sq, color.opponent());
        if path_clear && rook_present && safe {
            moves.push(CandidateMove {
                from,
                to: c_sq,
                is_castling: true,
                is_en_passant: false,
                is_promotion: false,
            });
        }
    }
}

fn generate_pawn_moves(
    board: &Board,
    from: Square,
    color: Color,
    en_passant: Option<Square>,
    moves: &mut Vec<CandidateMove>,
) {
    let dir = color.pawn_direction();
    let start_row = color.pawn_start_row();
    let promo_row = color.promotion_row();

    let mut add = |to: Square, is_ep: bool| {
        moves.push(CandidateMove {
            from,
            to,
            is_castling: false,
            is_en_passant: is_ep,
            is_promotion: to.row == promo_row,
        });
    };

    if let Some(one_ahead) = from.offset(dir, 0)
        && board.get(one_ahead).is_none()
    {
        add(one_ahead, false);
        if from.row == start_row
            && let Some(two_ahead) = from.offset(dir * 2, 0)
            && board.get(two_ahead).is_none()
        {
            add(two_ahead, false);
        }
    }

    for dc in [-1i8, 1] {
        if let Some(to) = from.offset(dir, dc) {
            if let Some(target) = board.get(to)
                && target.color != color
            {
                add(to, false);
            }
            if Some(to) == en_passant {
                add(to, true);
            }
        }
    }
}

/// Filters pseudo-legal moves down to legal ones: a move is legal iff,
/// after applying it to a scratch copy of the board, the mover's own king
/// is not in check. This single test subsumes the pin filter (a pinned
/// piece's illegal moves all expose the king), the check filter (moves that
/// don't resolve an existing check leave the king in check), and the king
/// filter (a king moving into an attacked square is, by definition, a king
/// left in check) — double-check falls out the same way, since with two
/// attackers only a king move can resolve both at once.
pub fn generate_legal_moves(
    board: &Board,
    turn: Color,
    castling: &CastlingRights,
    en_passant: Option<Square>,
) -> Vec<CandidateMove> {
    generate_pseudo_legal_moves(board, turn, castling, en_passant)
        .into_iter()
        .filter(|mv| {
            let mut test_board = board.clone();
            apply_candidate_to_grid(&mut test_board, mv, turn);
            !is_in_check(&test_board, turn)
        })
        .collect()
}

/// Applies a candidate move to a board's grid, for legality testing and for
/// actually executing a move. Leaves a promoting pawn as a pawn on the
/// destination square — promotion itself is a separate, later operation.
pub fn apply_candidate_to_grid(board: &mut Board, mv: &CandidateMove, color: Color) {
    let piece = board.get(mv.from).expect("apply_candidate_to_grid: empty from-square");
    board.set(mv.from, None);

    if mv.is_castling {
        let row = mv.from.row;
        if mv.to.column == 6 {
            let rook = board.get(Square::new(row, 7));
            board.set(Square::new(row, 7), None);
            board.set(Square::new(row, 5), rook);
        } else if mv.to.column == 2 {
            let rook = board.get(Square::new(row, 0));
            board.set(Square::new(row, 0), None);
            board.set(Square::new(row, 3), rook);
        }
    }

    if mv.is_en_passant {
        let captured_row = match color {
            Color::White => mv.to.row - 1,
            Color::Black => mv.to.row + 1,
        };
        board.set(Square::new(captured_row, mv.to.column), None);
    }

    board.set(mv.to, Some(piece));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Board;

    #[test]
    fn starting_position_has_twenty_legal_moves() {
        let board = Board::standard_starting();
        let moves = generate_legal_moves(&board, Color::White, &CastlingRights::default(), None);
        assert_eq!(moves.len(), 20);
    }

    #[test]
    fn starting_position_has_no_check() {
        let board = Board::standard_starting();
        assert!(!is_in_check(&board, Color::White));
        assert!(!is_in_check(&board, Color::Black));
    }

    #[test]
    fn en_passant_move_generated_only_for_one_ply() {
        let mut board = Board::empty();
        board.set(Square::new(0, 4), Some(Piece::new(PieceKind::King, Color::White)));
        board.set(Square::new(7, 4), Some(Piece::new(PieceKind::King, Color::Black)));
        board.set(Square::new(4, 4), Some(Piece::new(PieceKind::Pawn, Color::White)));
        board.set(Square::new(4, 3), Some(Piece::new(PieceKind::Pawn, Color::Black)));

        let no_castling = CastlingRights {
            white: SideCastlingRights { kingside: false, queenside: false },
            black: SideCastlingRights { kingside: false, queenside: false },
        };
        let ep = Some(Square::new(5, 3));
        let moves = generate_legal_moves(&board, Color::White, &no_castling, ep);
        let ep_moves: Vec<_> = moves.iter().filter(|m| m.is_en_passant).collect();
        assert_eq!(ep_moves.len(), 1);
        assert_eq!(ep_moves[0].from, Square::new(4, 4));
        assert_eq!(ep_moves[0].to, Square::new(5, 3));

        // One ply later there is no pawn to capture en passant with.
        let moves_later = generate_legal_moves(&board, Color::White, &no_castling, None);
        assert!(moves_later.iter().all(|m| !m.is_en_passant));
    }

    #[test]
    fn castling_requires_all_four_preconditions() {
        let mut board = Board::empty();
        board.set(Square::new(0, 4), Some(Piece::new(PieceKind::King, Color::White)));
        board.set(Square::new(0, 7), Some(Piece::new(PieceKind::Rook, Color::White)));
        board.set(Square::new(0, 0), Some(Piece::new(PieceKind::Rook, Color::White)));
        board.set(Square::new(7, 4), Some(Piece::new(PieceKind::King, Color::Black)));

        let both_sides = CastlingRights {
            white: SideCastlingRights { kingside: true, queenside: true },
            black: SideCastlingRights { kingside: false, queenside: false },
        };
        let moves = generate_legal_moves(&board, Color::White, &both_sides, None);
        assert_eq!(moves.iter().filter(|m| m.is_castling).count(), 2);

        // Block the kingside path — that castle disappears, queenside remains.
        let mut blocked = board.clone();
        blocked.set(Square::new(0, 5), Some(Piece::new(PieceKind::Bishop, Color::White)));
        let moves = generate_legal_moves(&blocked, Color::White, &both_sides, None);
        assert_eq!(moves.iter().filter(|m| m.is_castling).count(), 1);

        // Attack the square the king crosses — queenside disappears too.
        let mut attacked = board.clone();
        attacked.set(Square::new(5, 3), Some(Piece::new(PieceKind::Rook, Color::Black)));
        let moves = generate_legal_moves(&attacked, Color::White, &both_sides, None);
        assert_eq!(moves.iter().filter(|m| m.is_castling).count(), 1);
    }
}


