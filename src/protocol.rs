//! The line-oriented wire protocol: framing, verb dispatch, and the
//! per-connection session state.
//!
//! One [`Session`] exists per connection. It owns the logged-in username
//! (if any) and nothing else is global — the Account Store and Game Store
//! are passed in by reference from the connection dispatcher.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::account_store::AccountStore;
use crate::board::Field;
use crate::game::Game;
use crate::game_store::{
    ArchiveResult, CanLoadResult, CreateResult, DrawResult, ForfeitResult, GameStore, JoinResult,
    MoveResult, PromoteResult, RejectResult,
};
use crate::persist::CommandAudit;
use crate::types::Square;

// ---------------------------------------------------------------------------
// Status codes
// ---------------------------------------------------------------------------

const SERVER_ERROR: i32 = -1;
const FORMAT_INVALID: i32 = -2;
const NO_USER: i32 = -3;

mod codes {
    pub const SUCCESS: i32 = 0;

    pub mod login {
        pub const USERNAME_UNKNOWN: i32 = 1;
        pub const PASSWORD_INVALID: i32 = 2;
    }
    pub mod create {
        pub const USERNAME_IN_USE: i32 = 1;
        pub const FORMAT_INVALID: i32 = 2;
    }
    pub mod creategame {
        pub const ID_IN_USE: i32 = 1;
        pub const FORMAT_INVALID: i32 = 2;
    }
    pub mod joingame {
        pub const GAME_MISSING: i32 = 1;
        pub const FULL: i32 = 2;
        pub const ALREADY_IN: i32 = 3;
    }
    pub mod loadgame {
        pub const GAME_MISSING: i32 = 1;
        pub const NOT_IN_GAME: i32 = 2;
    }
    pub mod getgamedata {
        pub const GAME_MISSING: i32 = 1;
        pub const NOT_IN_GAME: i32 = 2;
    }
    pub mod mv {
        pub const SUCCESS_PROMOTION_NEEDED: i32 = -4;
        pub const GAME_MISSING: i32 = 1;
        pub const NOT_IN_GAME: i32 = 2;
        pub const NO_OPPONENT: i32 = 3;
        pub const GAME_OVER: i32 = 4;
        pub const NOT_YOUR_TURN: i32 = 5;
        pub const MUST_PROMOTE: i32 = 6;
        pub const RESPOND_TO_DRAW: i32 = 7;
        pub const MOVE_INVALID: i32 = 8;
    }
    pub mod promote {
        pub const GAME_MISSING: i32 = 1;
        pub const NOT_IN_GAME: i32 = 2;
        pub const NO_OPPONENT: i32 = 3;
        pub const GAME_OVER: i32 = 4;
        pub const NOT_YOUR_TURN: i32 = 5;
        pub const NO_PROMOTION_PENDING: i32 = 6;
        pub const CHAR_INVALID: i32 = 7;
        pub const RESPOND_TO_DRAW: i32 = 8;
    }
    /// Shared by `draw`, `reject`, and `forfeit` — the spec calls this out
    /// as a symmetric taxonomy, `NO_DRAW_OFFER` only meaningful for reject.
    pub mod draw_reject_forfeit {
        pub const GAME_MISSING: i32 = 1;
        pub const NOT_IN_GAME: i32 = 2;
        pub const NO_OPPONENT: i32 = 3;
        pub const GAME_OVER: i32 = 4;
        pub const NOT_YOUR_TURN: i32 = 5;
        pub const MUST_PROMOTE: i32 = 6;
        pub const NO_DRAW_OFFER: i32 = 7;
    }
    pub mod archive_restore {
        pub const GAME_MISSING: i32 = 1;
        pub const NOT_IN_GAME: i32 = 2;
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A write failure is either a quiet disconnect (the client is gone, the
/// session should just end) or something worth logging as fatal.
pub enum SessionError {
    ClientGone,
    Fatal(std::io::Error),
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::BrokenPipe {
            SessionError::ClientGone
        } else {
            SessionError::Fatal(e)
        }
    }
}

pub struct Session<W> {
    writer: W,
    logged_in_user: Option<String>,
}

impl<W: AsyncWrite + Unpin> Session<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, logged_in_user: None }
    }

    /// Reads lines from `reader` until EOF or a fatal/client-gone error,
    /// dispatching each one against the shared stores. Every parsed line is
    /// recorded to the command audit sink under `peer_label` before being
    /// handled, regardless of outcome.
    pub async fn run<R: AsyncRead + Unpin>(
        &mut self,
        reader: R,
        accounts: &Arc<AccountStore>,
        games: &Arc<GameStore>,
        audit: &Arc<CommandAudit>,
        peer_label: &str,
    ) {
        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return, // EOF: client closed the connection
                Err(_) => return,
            };
            audit.record(peer_label, &line).await;
            if let Err(err) = self.handle_line(&line, accounts, games).await {
                match err {
                    SessionError::ClientGone => return,
                    SessionError::Fatal(e) => {
                        log::error!("fatal session I/O error: {e}");
                        return;
                    }
                }
            }
        }
    }

    async fn handle_line(
        &mut self,
        line: &str,
        accounts: &AccountStore,
        games: &GameStore,
    ) -> Result<(), SessionError> {
        let (verb, rest) = match line.split_once(' ') {
            Some((v, r)) => (v, r.trim_end_matches(|c: char| c.is_ascii_whitespace())),
            None => (line.trim_end_matches(|c: char| c.is_ascii_whitespace()), ""),
        };

        match verb {
            "login" => self.cmd_login(rest, accounts, games).await,
            "create" => self.cmd_create(rest, accounts).await,
            "creategame" => self.cmd_creategame(rest, games).await,
            "joingame" => self.cmd_joingame(rest, games).await,
            "loadgame" => self.cmd_loadgame(rest, games).await,
            "loadgames" => self.cmd_loadgames(rest, games).await,
            "getgamedata" => self.cmd_getgamedata(rest, games).await,
            "opengames" => self.cmd_opengames(rest, games).await,
            "move" => self.cmd_move(rest, games).await,
            "promote" => self.cmd_promote(rest, games).await,
            "draw" => self.cmd_draw(rest, games).await,
            "reject" => self.cmd_reject(rest, games).await,
            "forfeit" => self.cmd_forfeit(rest, games).await,
            "archive" => self.cmd_archive(rest, games).await,
            "restore" => self.cmd_restore(rest, games).await,
            "logout" => {
                self.logged_in_user = None;
                Ok(())
            }
            _ => self.write_status(FORMAT_INVALID).await,
        }
    }

    // -- verbs that don't require login ------------------------------------

    async fn cmd_login(
        &mut self,
        rest: &str,
        accounts: &AccountStore,
        games: &GameStore,
    ) -> Result<(), SessionError> {
        let Some((username, password)) = split_two(rest) else {
            return self.write_status(FORMAT_INVALID).await;
        };
        if !accounts.username_exists(username).await {
            return self.write_status(codes::login::USERNAME_UNKNOWN).await;
        }
        if !accounts.valid_credentials(username, password).await {
            return self.write_status(codes::login::PASSWORD_INVALID).await;
        }
        self.logged_in_user = Some(username.to_string());
        let user_games = games.get_games_for(username).await;
        self.write_status(codes::SUCCESS).await?;
        self.write_int(user_games.len() as i32).await?;
        for game in &user_games {
            self.write_game_fields(game).await?;
        }
        Ok(())
    }

    async fn cmd_create(&mut self, rest: &str, accounts: &AccountStore) -> Result<(), SessionError> {
        let Some((username, password)) = split_two(rest) else {
            return self.write_status(codes::create::FORMAT_INVALID).await;
        };
        if accounts.add_account(username, password).await {
            self.write_status(codes::SUCCESS).await
        } else if accounts.username_exists(username).await {
            self.write_status(codes::create::USERNAME_IN_USE).await
        } else {
            self.write_status(codes::create::FORMAT_INVALID).await
        }
    }

    // -- verbs that require login --------------------------------------------

    async fn cmd_creategame(&mut self, rest: &str, games: &GameStore) -> Result<(), SessionError> {
        let Some(user) = self.require_login() else {
            return self.write_status(NO_USER).await;
        };
        let Some((id, open_flag)) = split_two(rest) else {
            return self.write_status(codes::creategame::FORMAT_INVALID).await;
        };
        let open = match open_flag {
            "0" => false,
            "1" => true,
            _ => return self.write_status(codes::creategame::FORMAT_INVALID).await,
        };
        if !valid_game_id(id) {
            return self.write_status(codes::creategame::FORMAT_INVALID).await;
        }
        match games.create(id, &user, open).await {
            CreateResult::Success => self.write_status(codes::SUCCESS).await,
            CreateResult::IdInUse => self.write_status(codes::creategame::ID_IN_USE).await,
            CreateResult::ServerError => self.write_status(SERVER_ERROR).await,
        }
    }

    async fn cmd_joingame(&mut self, rest: &str, games: &GameStore) -> Result<(), SessionError> {
        let Some(user) = self.require_login() else {
            return self.write_status(NO_USER).await;
        };
        let id = rest;
        if !valid_game_id(id) {
            return self.write_status(FORMAT_INVALID).await;
        }
        match games.join(id, &user).await {
            JoinResult::Success => self.write_status(codes::SUCCESS).await,
            JoinResult::GameMissing => self.write_status(codes::joingame::GAME_MISSING).await,
            JoinResult::Full => self.write_status(codes::joingame::FULL).await,
            JoinResult::AlreadyIn => self.write_status(codes::joingame::ALREADY_IN).await,
            JoinResult::ServerError => self.write_status(SERVER_ERROR).await,
        }
    }

    async fn cmd_loadgame(&mut self, rest: &str, games: &GameStore) -> Result<(), SessionError> {
        let Some(user) = self.require_login() else {
            return self.write_status(NO_USER).await;
        };
        let id = rest;
        if !valid_game_id(id) {
            return self.write_status(FORMAT_INVALID).await;
        }
        match games.can_load(id, &user).await {
            CanLoadResult::GameMissing => return self.write_status(codes::loadgame::GAME_MISSING).await,
            CanLoadResult::NotInGame => return self.write_status(codes::loadgame::NOT_IN_GAME).await,
            CanLoadResult::Ok => {}
        }
        let Some(game) = games.game_data(id).await else {
            return self.write_status(SERVER_ERROR).await;
        };
        let Some(board_fields) = games.load_board(id).await else {
            return self.write_status(SERVER_ERROR).await;
        };
        self.write_status(codes::SUCCESS).await?;
        self.write_game_fields(&game).await?;
        for field in board_fields {
            self.write_field(&field).await?;
        }
        Ok(())
    }

    async fn cmd_loadgames(&mut self, rest: &str, games: &GameStore) -> Result<(), SessionError> {
        let Some(user) = self.require_login() else {
            return self.write_status(NO_USER).await;
        };
        if !rest.is_empty() {
            return self.write_status(FORMAT_INVALID).await;
        }
        let user_games = games.get_games_for(&user).await;
        self.write_status(codes::SUCCESS).await?;
        self.write_int(user_games.len() as i32).await?;
        for game in &user_games {
            self.write_game_fields(game).await?;
        }
        Ok(())
    }

    async fn cmd_getgamedata(&mut self, rest: &str, games: &GameStore) -> Result<(), SessionError> {
        let Some(user) = self.require_login() else {
            return self.write_status(NO_USER).await;
        };
        let id = rest;
        if !valid_game_id(id) {
            return self.write_status(FORMAT_INVALID).await;
        }
        match games.can_load(id, &user).await {
            CanLoadResult::GameMissing => return self.write_status(codes::getgamedata::GAME_MISSING).await,
            CanLoadResult::NotInGame => return self.write_status(codes::getgamedata::NOT_IN_GAME).await,
            CanLoadResult::Ok => {}
        }
        let Some(game) = games.game_data(id).await else {
            return self.write_status(SERVER_ERROR).await;
        };
        self.write_status(codes::SUCCESS).await?;
        self.write_game_fields(&game).await
    }

    async fn cmd_opengames(&mut self, rest: &str, games: &GameStore) -> Result<(), SessionError> {
        if self.require_login().is_none() {
            return self.write_status(NO_USER).await;
        }
        if !rest.is_empty() {
            return self.write_status(FORMAT_INVALID).await;
        }
        let open = games.open_games().await;
        self.write_int(open.len() as i32).await?;
        for game in &open {
            self.write_game_fields(game).await?;
        }
        Ok(())
    }

    async fn cmd_move(&mut self, rest: &str, games: &GameStore) -> Result<(), SessionError> {
        let Some(user) = self.require_login() else {
            return self.write_status(NO_USER).await;
        };
        let Some((id, move_token)) = split_two(rest) else {
            return self.write_status(FORMAT_INVALID).await;
        };
        if !valid_game_id(id) {
            return self.write_status(FORMAT_INVALID).await;
        }
        let Some((src, dest)) = parse_move_token(move_token) else {
            return self.write_status(FORMAT_INVALID).await;
        };
        match games.make_move(id, &user, src, dest).await {
            MoveResult::Success => self.write_status(codes::SUCCESS).await,
            MoveResult::SuccessPromotionNeeded => {
                self.write_status(codes::mv::SUCCESS_PROMOTION_NEEDED).await
            }
            MoveResult::GameMissing => self.write_status(codes::mv::GAME_MISSING).await,
            MoveResult::NotInGame => self.write_status(codes::mv::NOT_IN_GAME).await,
            MoveResult::NoOpponent => self.write_status(codes::mv::NO_OPPONENT).await,
            MoveResult::GameOver => self.write_status(codes::mv::GAME_OVER).await,
            MoveResult::NotYourTurn => self.write_status(codes::mv::NOT_YOUR_TURN).await,
            MoveResult::MustPromote => self.write_status(codes::mv::MUST_PROMOTE).await,
            MoveResult::RespondToDraw => self.write_status(codes::mv::RESPOND_TO_DRAW).await,
            MoveResult::MoveInvalid => self.write_status(codes::mv::MOVE_INVALID).await,
            MoveResult::ServerError => self.write_status(SERVER_ERROR).await,
        }
    }

    async fn cmd_promote(&mut self, rest: &str, games: &GameStore) -> Result<(), SessionError> {
        let Some(user) = self.require_login() else {
            return self.write_status(NO_USER).await;
        };
        let Some((id, kind_token)) = split_two(rest) else {
            return self.write_status(FORMAT_INVALID).await;
        };
        if !valid_game_id(id) {
            return self.write_status(FORMAT_INVALID).await;
        }
        let mut chars = kind_token.chars();
        let (Some(kind_char), None) = (chars.next(), chars.next()) else {
            return self.write_status(FORMAT_INVALID).await;
        };
        match games.promote(id, &user, kind_char).await {
            PromoteResult::Success => self.write_status(codes::SUCCESS).await,
            PromoteResult::GameMissing => self.write_status(codes::promote::GAME_MISSING).await,
            PromoteResult::NotInGame => self.write_status(codes::promote::NOT_IN_GAME).await,
            PromoteResult::NoOpponent => self.write_status(codes::promote::NO_OPPONENT).await,
            PromoteResult::GameOver => self.write_status(codes::promote::GAME_OVER).await,
            PromoteResult::NotYourTurn => self.write_status(codes::promote::NOT_YOUR_TURN).await,
            PromoteResult::NoPromotionPending => {
                self.write_status(codes::promote::NO_PROMOTION_PENDING).await
            }
            PromoteResult::CharInvalid => self.write_status(codes::promote::CHAR_INVALID).await,
            PromoteResult::RespondToDraw => self.write_status(codes::promote::RESPOND_TO_DRAW).await,
            PromoteResult::ServerError => self.write_status(SERVER_ERROR).await,
        }
    }

    async fn cmd_draw(&mut self, rest: &str, games: &GameStore) -> Result<(), SessionError> {
        let Some(user) = self.require_login() else {
            return self.write_status(NO_USER).await;
        };
        let id = rest;
        if !valid_game_id(id) {
            return self.write_status(FORMAT_INVALID).await;
        }
        match games.draw(id, &user).await {
            DrawResult::Success => self.write_status(codes::SUCCESS).await,
            DrawResult::GameMissing => self.write_status(codes::draw_reject_forfeit::GAME_MISSING).await,
            DrawResult::NotInGame => self.write_status(codes::draw_reject_forfeit::NOT_IN_GAME).await,
            DrawResult::NoOpponent => self.write_status(codes::draw_reject_forfeit::NO_OPPONENT).await,
            DrawResult::GameOver => self.write_status(codes::draw_reject_forfeit::GAME_OVER).await,
            DrawResult::NotYourTurn => self.write_status(codes::draw_reject_forfeit::NOT_YOUR_TURN).await,
            DrawResult::MustPromote => self.write_status(codes::draw_reject_forfeit::MUST_PROMOTE).await,
            DrawResult::ServerError => self.write_status(SERVER_ERROR).await,
        }
    }

    async fn cmd_reject(&mut self, rest: &str, games: &GameStore) -> Result<(), SessionError> {
        let Some(user) = self.require_login() else {
            return self.write_status(NO_USER).await;
        };
        let id = rest;
        if !valid_game_id(id) {
            return self.write_status(FORMAT_INVALID).await;
        }
        match games.reject(id, &user).await {
            RejectResult::Success => self.write_status(codes::SUCCESS).await,
            RejectResult::GameMissing => self.write_status(codes::draw_reject_forfeit::GAME_MISSING).await,
            RejectResult::NotInGame => self.write_status(codes::draw_reject_forfeit::NOT_IN_GAME).await,
            RejectResult::NoOpponent => self.write_status(codes::draw_reject_forfeit::NO_OPPONENT).await,
            RejectResult::GameOver => self.write_status(codes::draw_reject_forfeit::GAME_OVER).await,
            RejectResult::NotYourTurn => self.write_status(codes::draw_reject_forfeit::NOT_YOUR_TURN).await,
            RejectResult::MustPromote => self.write_status(codes::draw_reject_forfeit::MUST_PROMOTE).await,
            RejectResult::NoDrawOffer => self.write_status(codes::draw_reject_forfeit::NO_DRAW_OFFER).await,
            RejectResult::ServerError => self.write_status(SERVER_ERROR).await,
        }
    }

    async fn cmd_forfeit(&mut self, rest: &str, games: &GameStore) -> Result<(), SessionError> {
        let Some(user) = self.require_login() else {
            return self.write_status(NO_USER).await;
        };
        let id = rest;
        if !valid_game_id(id) {
            return self.write_status(FORMAT_INVALID).await;
        }
        match games.forfeit(id, &user).await {
            ForfeitResult::Success => self.write_status(codes::SUCCESS).await,
            ForfeitResult::GameMissing => self.write_status(codes::draw_reject_forfeit::GAME_MISSING).await,
            ForfeitResult::NotInGame => self.write_status(codes::draw_reject_forfeit::NOT_IN_GAME).await,
            ForfeitResult::NoOpponent => self.write_status(codes::draw_reject_forfeit::NO_OPPONENT).await,
            ForfeitResult::GameOver => self.write_status(codes::draw_reject_forfeit::GAME_OVER).await,
            ForfeitResult::NotYourTurn => self.write_status(codes::draw_reject_forfeit::NOT_YOUR_TURN).await,
            ForfeitResult::MustPromote => self.write_status(codes::draw_reject_forfeit::MUST_PROMOTE).await,
            ForfeitResult::ServerError => self.write_status(SERVER_ERROR).await,
        }
    }

    async fn cmd_archive(&mut self, rest: &str, games: &GameStore) -> Result<(), SessionError> {
        let Some(user) = self.require_login() else {
            return self.write_status(NO_USER).await;
        };
        let id = rest;
        if !valid_game_id(id) {
            return self.write_status(FORMAT_INVALID).await;
        }
        self.write_archive_result(games.archive(id, &user).await).await
    }

    async fn cmd_restore(&mut self, rest: &str, games: &GameStore) -> Result<(), SessionError> {
        let Some(user) = self.require_login() else {
            return self.write_status(NO_USER).await;
        };
        let id = rest;
        if !valid_game_id(id) {
            return self.write_status(FORMAT_INVALID).await;
        }
        self.write_archive_result(games.restore(id, &user).await).await
    }

    async fn write_archive_result(&mut self, result: ArchiveResult) -> Result<(), SessionError> {
        match result {
            ArchiveResult::Success => self.write_status(codes::SUCCESS).await,
            ArchiveResult::GameMissing => self.write_status(codes::archive_restore::GAME_MISSING).await,
            ArchiveResult::NotInGame => self.write_status(codes::archive_restore::NOT_IN_GAME).await,
            ArchiveResult::ServerError => self.write_status(SERVER_ERROR).await,
        }
    }

    // -- small helpers --------------------------------------------------------

    fn require_login(&self) -> Option<String> {
        self.logged_in_user.clone()
    }

    async fn write_game_fields(&mut self, game: &Game) -> Result<(), SessionError> {
        for field in game.all_fields() {
            self.write_field(&field).await?;
        }
        Ok(())
    }

    async fn write_field(&mut self, field: &Field) -> Result<(), SessionError> {
        match field {
            Field::Int(n) => self.write_int(*n).await,
            Field::Str(s) => self.write_str(s).await,
        }
    }

    async fn write_status(&mut self, code: i32) -> Result<(), SessionError> {
        self.write_int(code).await
    }

    async fn write_int(&mut self, n: i32) -> Result<(), SessionError> {
        self.writer.write_all(&n.to_be_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn write_str(&mut self, s: &str) -> Result<(), SessionError> {
        self.writer.write_all(s.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Argument parsing
// ---------------------------------------------------------------------------

/// Splits `rest` into exactly two single-space-separated tokens.
fn split_two(rest: &str) -> Option<(&str, &str)> {
    let mut parts = rest.splitn(2, ' ');
    let first = parts.next()?;
    let second = parts.next()?;
    if first.is_empty() || second.is_empty() || second.contains(' ') {
        return None;
    }
    Some((first, second))
}

/// A gameID may not be empty, contain a comma, or contain a space (the
/// last is already implied by how the caller split the line into tokens).
fn valid_game_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(',') && !id.contains(' ')
}

/// Parses `"<sr>,<sc>-><dr>,<dc>"` into a pair of squares.
fn parse_move_token(token: &str) -> Option<(Square, Square)> {
    let (from_part, to_part) = token.split_once("->")?;
    let from = parse_square(from_part)?;
    let to = parse_square(to_part)?;
    Some((from, to))
}

fn parse_square(s: &str) -> Option<Square> {
    let (row, col) = s.split_once(',')?;
    let row: u8 = row.parse().ok()?;
    let col: u8 = col.parse().ok()?;
    if row > 7 || col > 7 {
        return None;
    }
    Some(Square::new(row, col))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_two_rejects_extra_whitespace() {
        assert_eq!(split_two("alice hunter2"), Some(("alice", "hunter2")));
        assert_eq!(split_two("alice"), None);
        assert_eq!(split_two("alice two words"), None);
    }

    #[test]
    fn game_id_rejects_comma_and_space() {
        assert!(valid_game_id("g1"));
        assert!(!valid_game_id(""));
        assert!(!valid_game_id("g,1"));
    }

    #[test]
    fn move_token_parses_coordinates() {
        let (src, dest) = parse_move_token("1,4->3,4").unwrap();
        assert_eq!(src, Square::new(1, 4));
        assert_eq!(dest, Square::new(3, 4));
        assert!(parse_move_token("1,4-3,4").is_none());
        assert!(parse_move_token("8,4->3,4").is_none());
    }

    async fn test_stores(tag: &str) -> (Arc<AccountStore>, Arc<GameStore>) {
        let dir = std::env::temp_dir().join(format!(
            "chesscorrespond-protocol-test-{tag}-{}",
            std::process::id()
        ));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let accounts = Arc::new(
            AccountStore::load(dir.join("accounts.csv"), dir.join("accounts.dump"))
                .await
                .unwrap(),
        );
        let games = Arc::new(
            GameStore::load(
                dir.join("active_games.csv"),
                dir.join("games"),
                dir.join("active_games.dump"),
                accounts.clone(),
            )
            .await
            .unwrap(),
        );
        (accounts, games)
    }

    #[tokio::test]
    async fn handle_line_trims_trailing_whitespace_from_args() {
        let (accounts, games) = test_stores("trailing-whitespace").await;
        accounts.add_account("alice", "hunter2").await;

        let mut session = Session::new(Vec::new());
        assert!(session
            .handle_line("login alice hunter2 ", &accounts, &games)
            .await
            .is_ok());
        assert!(session.logged_in_user.is_some());

        assert!(session
            .handle_line("loadgames \t", &accounts, &games)
            .await
            .is_ok());
        // A trailing-whitespace-only arg region means no args, so this
        // should succeed rather than falling through to FORMAT_INVALID.
        let written = session.writer;
        let status = i32::from_be_bytes(written[written.len() - 8..written.len() - 4].try_into().unwrap());
        assert_eq!(status, codes::SUCCESS);
    }
}
