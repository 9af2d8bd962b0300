//! Game storage: the live game table, its indices, and its batched
//! persistence to `active_games.csv` plus one board file per game.
//!
//! Every mutating operation runs the same eight-step precondition chain
//! (known account, game exists, caller is a player, game has two players,
//! game is not over, it is the caller's turn, no promotion owed, no draw
//! offer owed) and only a handful of verbs are exempted from individual
//! steps — `promote` inverts the promotion check, `draw`/`reject`/`forfeit`
//! are exempt from the draw-offer check since handling that state *is*
//! their job, and `archive`/`restore` skip straight past steps 4-8
//! entirely since they don't touch gameplay state.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::account_store::AccountStore;
use crate::board::{Board, Field, MoveOutcome, PromoteOutcome};
use crate::game::{Game, GameFieldKey, StateFlag, GAME_FIELD_ORDER};
use crate::persist::emit_disaster_dump;
use crate::types::{Color, Square};

/// Number of mutating operations allowed between full saves.
const MUTATIONS_BEFORE_SAVE: u32 = 20;

// ---------------------------------------------------------------------------
// Result taxonomies, one per verb
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateResult {
    Success,
    IdInUse,
    ServerError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinResult {
    Success,
    GameMissing,
    Full,
    AlreadyIn,
    ServerError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanLoadResult {
    Ok,
    GameMissing,
    NotInGame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveResult {
    Success,
    SuccessPromotionNeeded,
    GameMissing,
    NotInGame,
    NoOpponent,
    GameOver,
    NotYourTurn,
    MustPromote,
    RespondToDraw,
    MoveInvalid,
    ServerError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteResult {
    Success,
    GameMissing,
    NotInGame,
    NoOpponent,
    GameOver,
    NotYourTurn,
    NoPromotionPending,
    CharInvalid,
    RespondToDraw,
    ServerError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawResult {
    Success,
    GameMissing,
    NotInGame,
    NoOpponent,
    GameOver,
    NotYourTurn,
    MustPromote,
    ServerError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectResult {
    Success,
    GameMissing,
    NotInGame,
    NoOpponent,
    GameOver,
    NotYourTurn,
    MustPromote,
    NoDrawOffer,
    ServerError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForfeitResult {
    Success,
    GameMissing,
    NotInGame,
    NoOpponent,
    GameOver,
    NotYourTurn,
    MustPromote,
    ServerError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveResult {
    Success,
    GameMissing,
    NotInGame,
    ServerError,
}

// ---------------------------------------------------------------------------
// Shared precondition chain
// ---------------------------------------------------------------------------

enum PrecheckFailure {
    NotInGame,
    NoOpponent,
    GameOver,
    NotYourTurn,
    MustPromote,
    RespondToDraw,
}

struct PrecheckSteps {
    require_turn: bool,
    block_pending_promotion: bool,
    block_pending_draw_offer: bool,
}

fn precheck(game: &Game, user: &str, steps: PrecheckSteps) -> Result<(), PrecheckFailure> {
    if !game.has_player(user) {
        return Err(PrecheckFailure::NotInGame);
    }
    if game.white.is_none() || game.black.is_none() {
        return Err(PrecheckFailure::NoOpponent);
    }
    if game.is_over() {
        return Err(PrecheckFailure::GameOver);
    }
    if steps.require_turn && !game.is_turn_of(user) {
        return Err(PrecheckFailure::NotYourTurn);
    }
    if steps.block_pending_promotion && game.promotion_needed && game.is_turn_of(user) {
        return Err(PrecheckFailure::MustPromote);
    }
    if steps.block_pending_draw_offer && game.draw_offered && game.is_turn_of(user) {
        return Err(PrecheckFailure::RespondToDraw);
    }
    Ok(())
}

fn color_of(game: &Game, user: &str) -> Color {
    if game.white.as_deref() == Some(user) {
        Color::White
    } else {
        Color::Black
    }
}

fn state_of(color: Color) -> StateFlag {
    match color {
        Color::White => StateFlag::White,
        Color::Black => StateFlag::Black,
    }
}

// ---------------------------------------------------------------------------
// GameStore
// ---------------------------------------------------------------------------

struct Inner {
    games: HashMap<String, Game>,
    by_user: HashMap<String, HashSet<String>>,
    open_game_ids: HashSet<String>,
    unsaved_games: HashSet<String>,
    mutations_since_save: u32,
    games_csv_path: PathBuf,
    games_dir: PathBuf,
    disaster_path: PathBuf,
}

pub struct GameStore {
    inner: Mutex<Inner>,
    accounts: Arc<AccountStore>,
}

impl GameStore {
    pub async fn load(
        games_csv_path: PathBuf,
        games_dir: PathBuf,
        disaster_path: PathBuf,
        accounts: Arc<AccountStore>,
    ) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(&games_dir).await?;
        let mut games = HashMap::new();
        let mut by_user: HashMap<String, HashSet<String>> = HashMap::new();
        let mut open_game_ids = HashSet::new();

        if let Ok(text) = tokio::fs::read_to_string(&games_csv_path).await {
            for line in text.lines() {
                if let Some(game) = parse_game_csv_row(line) {
                    if let Ok(board_lines) = tokio::fs::read_to_string(
                        games_dir.join(format!("{}.txt", game.id)),
                    )
                    .await
                    {
                        let lines: Vec<String> = board_lines.lines().map(str::to_string).collect();
                        if let Ok(board) = Board::load(&lines) {
                            let mut game = game;
                            game.board = board;
                            index_game(&mut by_user, &mut open_game_ids, &game);
                            games.insert(game.id.clone(), game);
                        }
                    }
                }
            }
        }

        let standard_dir = games_dir.join("standard");
        tokio::fs::create_dir_all(&standard_dir).await?;
        let template_path = standard_dir.join("new_board.txt");
        if tokio::fs::metadata(&template_path).await.is_err() {
            let mut buf = Vec::new();
            Board::standard_starting().save_to(&mut buf)?;
            tokio::fs::write(&template_path, buf).await?;
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                games,
                by_user,
                open_game_ids,
                unsaved_games: HashSet::new(),
                mutations_since_save: 0,
                games_csv_path,
                games_dir,
                disaster_path,
            }),
            accounts,
        })
    }

    pub async fn get_games_for(&self, user: &str) -> Vec<Game> {
        let inner = self.inner.lock().await;
        match inner.by_user.get(user) {
            Some(ids) => ids.iter().filter_map(|id| inner.games.get(id)).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn open_games(&self) -> Vec<Game> {
        let inner = self.inner.lock().await;
        inner
            .open_game_ids
            .iter()
            .filter_map(|id| inner.games.get(id))
            .cloned()
            .collect()
    }

    pub async fn game_data(&self, id: &str) -> Option<Game> {
        self.inner.lock().await.games.get(id).cloned()
    }

    pub async fn can_load(&self, id: &str, user: &str) -> CanLoadResult {
        let inner = self.inner.lock().await;
        match inner.games.get(id) {
            None => CanLoadResult::GameMissing,
            Some(game) if !game.has_player(user) => CanLoadResult::NotInGame,
            Some(_) => CanLoadResult::Ok,
        }
    }

    pub async fn load_board(&self, id: &str) -> Option<Vec<Field>> {
        self.inner.lock().await.games.get(id).map(|g| g.board.save_data())
    }

    pub async fn create(&self, id: &str, user: &str, open: bool) -> CreateResult {
        if !self.accounts.username_exists(user).await {
            return CreateResult::ServerError;
        }
        let mut inner = self.inner.lock().await;
        if inner.games.contains_key(id) {
            return CreateResult::IdInUse;
        }
        let game = Game::new(id.to_string(), user.to_string(), open);
        index_game(&mut inner.by_user, &mut inner.open_game_ids, &game);
        inner.games.insert(id.to_string(), game);
        self.mark_dirty_and_maybe_save(&mut inner, id).await;
        CreateResult::Success
    }

    pub async fn join(&self, id: &str, user: &str) -> JoinResult {
        if !self.accounts.username_exists(user).await {
            return JoinResult::ServerError;
        }
        let mut inner = self.inner.lock().await;
        let game = match inner.games.get(id) {
            Some(g) => g,
            None => return JoinResult::GameMissing,
        };
        if game.has_player(user) {
            return JoinResult::AlreadyIn;
        }
        if !game.open || game.black.is_some() {
            return JoinResult::Full;
        }

        let game = inner.games.get_mut(id).expect("checked above");
        game.black = Some(user.to_string());
        game.open = false;
        inner.open_game_ids.remove(id);
        inner.by_user.entry(user.to_string()).or_default().insert(id.to_string());
        self.mark_dirty_and_maybe_save(&mut inner, id).await;
        JoinResult::Success
    }

    pub async fn make_move(&self, id: &str, user: &str, src: Square, dest: Square) -> MoveResult {
        if !self.accounts.username_exists(user).await {
            return MoveResult::ServerError;
        }
        let mut inner = self.inner.lock().await;
        let game = match inner.games.get_mut(id) {
            Some(g) => g,
            None => return MoveResult::GameMissing,
        };
        let steps = PrecheckSteps {
            require_turn: true,
            block_pending_promotion: true,
            block_pending_draw_offer: true,
        };
        if let Err(failure) = precheck(game, user, steps) {
            return match failure {
                PrecheckFailure::NotInGame => MoveResult::NotInGame,
                PrecheckFailure::NoOpponent => MoveResult::NoOpponent,
                PrecheckFailure::GameOver => MoveResult::GameOver,
                PrecheckFailure::NotYourTurn => MoveResult::NotYourTurn,
                PrecheckFailure::MustPromote => MoveResult::MustPromote,
                PrecheckFailure::RespondToDraw => MoveResult::RespondToDraw,
            };
        }

        let mover = color_of(game, user);
        let result = match game.board.move_piece(src, dest) {
            MoveOutcome::Invalid => MoveResult::MoveInvalid,
            MoveOutcome::WrongTurn => MoveResult::NotYourTurn,
            MoveOutcome::MustPromoteFirst => MoveResult::MustPromote,
            MoveOutcome::MovedPromotionRequired => {
                game.promotion_needed = true;
                MoveResult::SuccessPromotionNeeded
            }
            MoveOutcome::MovedNormally => {
                if mover == Color::Black {
                    game.turn_number += 1;
                }
                settle_move_consequences(game, mover);
                MoveResult::Success
            }
        };

        if matches!(
            result,
            MoveResult::Success | MoveResult::SuccessPromotionNeeded
        ) {
            self.mark_dirty_and_maybe_save(&mut inner, id).await;
        }
        result
    }

    pub async fn promote(&self, id: &str, user: &str, kind_char: char) -> PromoteResult {
        if !self.accounts.username_exists(user).await {
            return PromoteResult::ServerError;
        }
        let mut inner = self.inner.lock().await;
        let game = match inner.games.get_mut(id) {
            Some(g) => g,
            None => return PromoteResult::GameMissing,
        };
        let steps = PrecheckSteps {
            require_turn: true,
            block_pending_promotion: false,
            block_pending_draw_offer: false,
        };
        if let Err(failure) = precheck(game, user, steps) {
            return match failure {
                PrecheckFailure::NotInGame => PromoteResult::NotInGame,
                PrecheckFailure::NoOpponent => PromoteResult::NoOpponent,
                PrecheckFailure::GameOver => PromoteResult::GameOver,
                PrecheckFailure::NotYourTurn => PromoteResult::NotYourTurn,
                PrecheckFailure::MustPromote | PrecheckFailure::RespondToDraw => {
                    unreachable!("neither check requested")
                }
            };
        }
        // Step 7 (inverted for this verb) comes before step 8, matching the
        // chain's fixed order: a caller with nothing pending gets
        // `NoPromotionPending` even if a draw offer is also outstanding.
        if !game.promotion_needed {
            return PromoteResult::NoPromotionPending;
        }
        if game.draw_offered && game.is_turn_of(user) {
            return PromoteResult::RespondToDraw;
        }

        let mover = color_of(game, user);
        let result = match game.board.promote(kind_char) {
            PromoteOutcome::NoPromotionPending => PromoteResult::NoPromotionPending,
            PromoteOutcome::InvalidPieceChar => PromoteResult::CharInvalid,
            PromoteOutcome::Ok => {
                game.promotion_needed = false;
                if mover == Color::Black {
                    game.turn_number += 1;
                }
                settle_move_consequences(game, mover);
                PromoteResult::Success
            }
        };

        if result == PromoteResult::Success {
            self.mark_dirty_and_maybe_save(&mut inner, id).await;
        }
        result
    }

    pub async fn draw(&self, id: &str, user: &str) -> DrawResult {
        if !self.accounts.username_exists(user).await {
            return DrawResult::ServerError;
        }
        let mut inner = self.inner.lock().await;
        let game = match inner.games.get_mut(id) {
            Some(g) => g,
            None => return DrawResult::GameMissing,
        };
        let steps = PrecheckSteps {
            require_turn: true,
            block_pending_promotion: true,
            block_pending_draw_offer: false,
        };
        if let Err(failure) = precheck(game, user, steps) {
            return match failure {
                PrecheckFailure::NotInGame => DrawResult::NotInGame,
                PrecheckFailure::NoOpponent => DrawResult::NoOpponent,
                PrecheckFailure::GameOver => DrawResult::GameOver,
                PrecheckFailure::NotYourTurn => DrawResult::NotYourTurn,
                PrecheckFailure::MustPromote => DrawResult::MustPromote,
                PrecheckFailure::RespondToDraw => unreachable!("draw is exempt from this check"),
            };
        }

        if game.draw_offered {
            game.draw_offered = false;
            game.drawn = true;
        } else {
            let offerer = color_of(game, user);
            game.draw_offered = true;
            game.state = state_of(offerer.opponent());
        }
        self.mark_dirty_and_maybe_save(&mut inner, id).await;
        DrawResult::Success
    }

    pub async fn reject(&self, id: &str, user: &str) -> RejectResult {
        if !self.accounts.username_exists(user).await {
            return RejectResult::ServerError;
        }
        let mut inner = self.inner.lock().await;
        let game = match inner.games.get_mut(id) {
            Some(g) => g,
            None => return RejectResult::GameMissing,
        };
        let steps = PrecheckSteps {
            require_turn: true,
            block_pending_promotion: true,
            block_pending_draw_offer: false,
        };
        if let Err(failure) = precheck(game, user, steps) {
            return match failure {
                PrecheckFailure::NotInGame => RejectResult::NotInGame,
                PrecheckFailure::NoOpponent => RejectResult::NoOpponent,
                PrecheckFailure::GameOver => RejectResult::GameOver,
                PrecheckFailure::NotYourTurn => RejectResult::NotYourTurn,
                PrecheckFailure::MustPromote => RejectResult::MustPromote,
                PrecheckFailure::RespondToDraw => unreachable!("reject is exempt from this check"),
            };
        }
        if !game.draw_offered {
            return RejectResult::NoDrawOffer;
        }

        let responder = color_of(game, user);
        game.draw_offered = false;
        game.state = state_of(responder.opponent());
        self.mark_dirty_and_maybe_save(&mut inner, id).await;
        RejectResult::Success
    }

    /// Shares its precondition taxonomy with `draw`/`reject`: the caller's
    /// own turn and pending-promotion checks apply, but (like draw/reject)
    /// forfeit is exempt from the pending-draw-offer check since resolving
    /// that offer is exactly what forfeit is allowed to do.
    pub async fn forfeit(&self, id: &str, user: &str) -> ForfeitResult {
        if !self.accounts.username_exists(user).await {
            return ForfeitResult::ServerError;
        }
        let mut inner = self.inner.lock().await;
        let game = match inner.games.get_mut(id) {
            Some(g) => g,
            None => return ForfeitResult::GameMissing,
        };
        let steps = PrecheckSteps {
            require_turn: true,
            block_pending_promotion: true,
            block_pending_draw_offer: false,
        };
        if let Err(failure) = precheck(game, user, steps) {
            return match failure {
                PrecheckFailure::NotInGame => ForfeitResult::NotInGame,
                PrecheckFailure::NoOpponent => ForfeitResult::NoOpponent,
                PrecheckFailure::GameOver => ForfeitResult::GameOver,
                PrecheckFailure::NotYourTurn => ForfeitResult::NotYourTurn,
                PrecheckFailure::MustPromote => ForfeitResult::MustPromote,
                PrecheckFailure::RespondToDraw => unreachable!("forfeit is exempt from this check"),
            };
        }

        let loser = color_of(game, user);
        game.winner = match loser {
            Color::White => game.black.clone(),
            Color::Black => game.white.clone(),
        };
        game.forfeit = true;
        self.mark_dirty_and_maybe_save(&mut inner, id).await;
        ForfeitResult::Success
    }

    pub async fn archive(&self, id: &str, user: &str) -> ArchiveResult {
        self.set_archived(id, user, true).await
    }

    pub async fn restore(&self, id: &str, user: &str) -> ArchiveResult {
        self.set_archived(id, user, false).await
    }

    async fn set_archived(&self, id: &str, user: &str, archived: bool) -> ArchiveResult {
        if !self.accounts.username_exists(user).await {
            return ArchiveResult::ServerError;
        }
        let mut inner = self.inner.lock().await;
        let game = match inner.games.get_mut(id) {
            Some(g) => g,
            None => return ArchiveResult::GameMissing,
        };
        if !game.has_player(user) {
            return ArchiveResult::NotInGame;
        }
        match color_of(game, user) {
            Color::White => game.white_archived = archived,
            Color::Black => game.black_archived = archived,
        }
        self.mark_dirty_and_maybe_save(&mut inner, id).await;
        ArchiveResult::Success
    }

    /// Forces a full save regardless of the mutation counter. Called once
    /// at shutdown.
    pub async fn save(&self) {
        let mut inner = self.inner.lock().await;
        Self::flush(&mut inner).await;
    }

    async fn mark_dirty_and_maybe_save(&self, inner: &mut Inner, id: &str) {
        inner.unsaved_games.insert(id.to_string());
        inner.mutations_since_save += 1;
        if inner.mutations_since_save >= MUTATIONS_BEFORE_SAVE {
            Self::flush(inner).await;
        }
    }

    async fn flush(inner: &mut Inner) {
        if inner.unsaved_games.is_empty() {
            return;
        }

        let mut csv = String::new();
        for game in inner.games.values() {
            csv.push_str(&render_game_csv_row(game));
            csv.push('\n');
        }

        let csv_result = tokio::fs::write(&inner.games_csv_path, csv.as_bytes()).await;
        if let Err(e) = csv_result {
            log::error!("failed to save active games table: {e}");
            emit_disaster_dump("active games table", &inner.disaster_path, &csv).await;
            return;
        }

        let mut failed = Vec::new();
        for id in inner.unsaved_games.iter() {
            let Some(game) = inner.games.get(id) else { continue };
            let mut buf = Vec::new();
            if game.board.save_to(&mut buf).is_err() {
                failed.push(id.clone());
                continue;
            }
            let path = inner.games_dir.join(format!("{id}.txt"));
            if let Err(e) = tokio::fs::write(&path, &buf).await {
                log::error!("failed to save board file for game {id}: {e}");
                let dump_path = inner.disaster_path.with_extension(format!("{id}.txt"));
                emit_disaster_dump(
                    &format!("board file for game {id}"),
                    &dump_path,
                    &String::from_utf8_lossy(&buf),
                )
                .await;
                failed.push(id.clone());
            }
        }

        inner.unsaved_games = failed.into_iter().collect();
        inner.mutations_since_save = 0;
    }
}

/// Applies post-move bookkeeping shared by a completed normal move and a
/// resolved promotion: checkmate/stalemate detection, check flags, and
/// passing the turn.
fn settle_move_consequences(game: &mut Game, mover: Color) {
    let opponent = mover.opponent();
    if game.board.is_checkmate(opponent) {
        game.winner = match mover {
            Color::White => game.white.clone(),
            Color::Black => game.black.clone(),
        };
    } else if game.board.is_stalemate() {
        game.drawn = true;
    } else {
        game.state = state_of(opponent);
    }
    game.white_check = game.board.is_check(Color::White);
    game.black_check = game.board.is_check(Color::Black);
}

fn index_game(
    by_user: &mut HashMap<String, HashSet<String>>,
    open_game_ids: &mut HashSet<String>,
    game: &Game,
) {
    if let Some(white) = &game.white {
        by_user.entry(white.clone()).or_default().insert(game.id.clone());
    }
    if let Some(black) = &game.black {
        by_user.entry(black.clone()).or_default().insert(game.id.clone());
    }
    if game.open {
        open_game_ids.insert(game.id.clone());
    }
}

fn render_game_csv_row(game: &Game) -> String {
    GAME_FIELD_ORDER
        .iter()
        .map(|&key| match game.field_value(key) {
            Field::Int(n) => n.to_string(),
            Field::Str(s) => s,
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_game_csv_row(line: &str) -> Option<Game> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != GAME_FIELD_ORDER.len() {
        return None;
    }
    let as_bool = |s: &str| s == "1";
    let as_opt_string = |s: &str| if s.is_empty() { None } else { Some(s.to_string()) };

    let mut game = Game::new(fields[0].to_string(), String::new(), false);
    game.white = as_opt_string(fields[1]);
    game.black = as_opt_string(fields[2]);
    game.open = as_bool(fields[3]);
    game.state = if fields[4] == "1" { StateFlag::Black } else { StateFlag::White };
    game.turn_number = fields[5].parse().ok()?;
    game.white_archived = as_bool(fields[6]);
    game.black_archived = as_bool(fields[7]);
    game.draw_offered = as_bool(fields[8]);
    game.drawn = as_bool(fields[9]);
    game.winner = as_opt_string(fields[10]);
    game.forfeit = as_bool(fields[11]);
    game.white_check = as_bool(fields[12]);
    game.black_check = as_bool(fields[13]);
    game.promotion_needed = as_bool(fields[14]);
    Some(game)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fresh_stores(tag: &str) -> (Arc<AccountStore>, GameStore) {
        let dir = std::env::temp_dir().join(format!("chesscorrespond-gametest-{tag}-{}", std::process::id()));
        let _ = tokio::fs::remove_dir_all(&dir).await;
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let accounts = Arc::new(
            AccountStore::load(dir.join("accounts.csv"), dir.join("accounts.dump"))
                .await
                .unwrap(),
        );
        accounts.add_account("alice", "pw").await;
        accounts.add_account("bob", "pw").await;
        let games = GameStore::load(
            dir.join("active_games.csv"),
            dir.join("games"),
            dir.join("games.dump"),
            accounts.clone(),
        )
        .await
        .unwrap();
        (accounts, games)
    }

    #[tokio::test]
    async fn create_then_join_fills_both_seats() {
        let (_accounts, games) = fresh_stores("create-join").await;
        assert_eq!(games.create("g1", "alice", true).await, CreateResult::Success);
        assert_eq!(games.create("g1", "alice", true).await, CreateResult::IdInUse);
        assert_eq!(games.join("g1", "alice").await, JoinResult::AlreadyIn);
        assert_eq!(games.join("g1", "bob").await, JoinResult::Success);
        assert_eq!(games.join("g1", "bob").await, JoinResult::AlreadyIn);

        let snapshot = games.game_data("g1").await.unwrap();
        assert_eq!(snapshot.white.as_deref(), Some("alice"));
        assert_eq!(snapshot.black.as_deref(), Some("bob"));
        assert!(!snapshot.open);
    }

    #[tokio::test]
    async fn move_out_of_turn_is_rejected() {
        let (_accounts, games) = fresh_stores("move-turn").await;
        games.create("g1", "alice", true).await;
        games.join("g1", "bob").await;

        let result = games
            .make_move("g1", "bob", Square::new(6, 4), Square::new(4, 4))
            .await;
        assert_eq!(result, MoveResult::NotYourTurn);
    }

    #[tokio::test]
    async fn can_load_reports_game_missing_not_a_borrowed_code() {
        let (_accounts, games) = fresh_stores("can-load").await;
        assert_eq!(games.can_load("nope", "alice").await, CanLoadResult::GameMissing);
    }

    #[tokio::test]
    async fn draw_offer_then_accept_ends_the_game() {
        let (_accounts, games) = fresh_stores("draw").await;
        games.create("g1", "alice", true).await;
        games.join("g1", "bob").await;

        assert_eq!(games.draw("g1", "alice").await, DrawResult::Success);
        // Alice cannot move again until Bob responds.
        let blocked = games
            .make_move("g1", "alice", Square::new(1, 4), Square::new(3, 4))
            .await;
        assert_eq!(blocked, MoveResult::NotYourTurn);

        assert_eq!(games.draw("g1", "bob").await, DrawResult::Success);
        let snapshot = games.game_data("g1").await.unwrap();
        assert!(snapshot.drawn);
        assert!(snapshot.is_over());
    }

    #[tokio::test]
    async fn reject_returns_turn_to_the_original_offerer() {
        let (_accounts, games) = fresh_stores("reject").await;
        games.create("g1", "alice", true).await;
        games.join("g1", "bob").await;

        games.draw("g1", "alice").await;
        assert_eq!(games.reject("g1", "bob").await, RejectResult::Success);
        assert_eq!(games.reject("g1", "bob").await, RejectResult::NoDrawOffer);

        let move_result = games
            .make_move("g1", "alice", Square::new(1, 4), Square::new(3, 4))
            .await;
        assert_eq!(move_result, MoveResult::Success);
    }

    #[tokio::test]
    async fn forfeit_requires_the_callers_own_turn() {
        let (_accounts, games) = fresh_stores("forfeit").await;
        games.create("g1", "alice", true).await;
        games.join("g1", "bob").await;

        // It's Alice's turn; Bob cannot forfeit out of turn.
        assert_eq!(games.forfeit("g1", "bob").await, ForfeitResult::NotYourTurn);

        assert_eq!(games.forfeit("g1", "alice").await, ForfeitResult::Success);
        let snapshot = games.game_data("g1").await.unwrap();
        assert_eq!(snapshot.winner.as_deref(), Some("bob"));
        assert!(snapshot.forfeit);
    }

    #[tokio::test]
    async fn forfeit_is_allowed_while_a_draw_offer_is_pending() {
        let (_accounts, games) = fresh_stores("forfeit-draw").await;
        games.create("g1", "alice", true).await;
        games.join("g1", "bob").await;

        games.draw("g1", "alice").await; // offers a draw, state flips to bob
        assert_eq!(games.forfeit("g1", "bob").await, ForfeitResult::Success);
        let snapshot = games.game_data("g1").await.unwrap();
        assert_eq!(snapshot.winner.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn promote_with_nothing_pending_wins_over_a_stray_draw_offer() {
        let (_accounts, games) = fresh_stores("promote-precedence").await;
        games.create("g1", "alice", true).await;
        games.join("g1", "bob").await;

        // Alice offers a draw; it becomes Bob's turn to respond. Nothing is
        // pending promotion-wise for Bob, so `promote` must report
        // `NoPromotionPending` (step 7) rather than `RespondToDraw` (step 8),
        // even though both conditions hold.
        games.draw("g1", "alice").await;
        assert_eq!(games.promote("g1", "bob", 'q').await, PromoteResult::NoPromotionPending);
    }
}


