//! Text protocol spoken on top of the transport.
//!
//! Clients send `<signifier>,<username>,<credential>` lines (signifier 1 creates
//! an account, 2 logs in) or `StateChangedSuccessfully:<state>` acknowledgements.
//! The server answers with bare tokens such as `CreateAccountSuccess` or
//! `StateChange:MainMenu`.
//!
//! Fields are taken verbatim: there is no escaping, so a username or credential
//! containing a comma cannot be expressed.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const CREATE_ACCOUNT_SIGNIFIER: i32 = 1;
pub const LOGIN_SIGNIFIER: i32 = 2;

pub const FIELD_DELIMITER: char = ',';
pub const STATE_ACK_PREFIX: &str = "StateChangedSuccessfully:";
pub const STATE_CHANGE_PREFIX: &str = "StateChange:";

/// Why a payload could not be turned into a command or reply
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("expected at least 3 fields, got {0}")]
    TooFewFields(usize),
    #[error("signifier {0:?} is not an integer")]
    InvalidSignifier(String),
    #[error("unknown signifier {0}")]
    UnknownSignifier(i32),
    #[error("unknown game state {0:?}")]
    UnknownState(String),
    #[error("unknown server reply {0:?}")]
    UnknownReply(String),
}

/// The single shared game state every client observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GameState {
    #[default]
    Login,
    MainMenu,
    Lobby,
    InGame,
    Win,
    Lose,
}

impl GameState {
    pub const ALL: [GameState; 6] = [
        GameState::Login,
        GameState::MainMenu,
        GameState::Lobby,
        GameState::InGame,
        GameState::Win,
        GameState::Lose,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GameState::Login => "Login",
            GameState::MainMenu => "MainMenu",
            GameState::Lobby => "Lobby",
            GameState::InGame => "InGame",
            GameState::Win => "Win",
            GameState::Lose => "Lose",
        }
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GameState {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GameState::ALL
            .into_iter()
            .find(|state| state.name() == s)
            .ok_or_else(|| DecodeError::UnknownState(s.to_string()))
    }
}

/// A parsed client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreateAccount { username: String, credential: String },
    Login { username: String, credential: String },
    /// Client reports it switched to the given state. The name is kept as sent,
    /// it is informational only.
    StateAck { reported_state: String },
    Malformed(DecodeError),
}

impl Command {
    /// Decodes one payload received from a client
    pub fn decode(payload: &[u8]) -> Command {
        match std::str::from_utf8(payload) {
            Ok(text) => Command::parse(text),
            Err(_) => Command::Malformed(DecodeError::InvalidUtf8),
        }
    }

    /// Parses one protocol line. Never fails: unusable input becomes `Malformed`.
    pub fn parse(line: &str) -> Command {
        let line = strip_line_terminator(line);

        if let Some(state) = line.strip_prefix(STATE_ACK_PREFIX) {
            return Command::StateAck {
                reported_state: state.to_string(),
            };
        }

        let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
        if fields.len() < 3 {
            return Command::Malformed(DecodeError::TooFewFields(fields.len()));
        }

        let signifier = match fields[0].trim().parse::<i32>() {
            Ok(signifier) => signifier,
            Err(_) => {
                return Command::Malformed(DecodeError::InvalidSignifier(fields[0].to_string()))
            }
        };

        let username = fields[1].to_string();
        let credential = fields[2].to_string();

        match signifier {
            CREATE_ACCOUNT_SIGNIFIER => Command::CreateAccount {
                username,
                credential,
            },
            LOGIN_SIGNIFIER => Command::Login {
                username,
                credential,
            },
            other => Command::Malformed(DecodeError::UnknownSignifier(other)),
        }
    }

    /// Renders the command the way a client puts it on the wire.
    /// `Malformed` has no wire form.
    pub fn encode(&self) -> Option<String> {
        match self {
            Command::CreateAccount {
                username,
                credential,
            } => Some(format!(
                "{}{}{}{}{}",
                CREATE_ACCOUNT_SIGNIFIER, FIELD_DELIMITER, username, FIELD_DELIMITER, credential
            )),
            Command::Login {
                username,
                credential,
            } => Some(format!(
                "{}{}{}{}{}",
                LOGIN_SIGNIFIER, FIELD_DELIMITER, username, FIELD_DELIMITER, credential
            )),
            Command::StateAck { reported_state } => {
                Some(format!("{}{}", STATE_ACK_PREFIX, reported_state))
            }
            Command::Malformed(_) => None,
        }
    }
}

fn strip_line_terminator(line: &str) -> &str {
    match line.strip_suffix('\n') {
        Some(rest) => rest.strip_suffix('\r').unwrap_or(rest),
        None => line,
    }
}

/// A reply token sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerReply {
    CreateAccountSuccess,
    CreateAccountFail,
    StateChange(GameState),
    LoginFail,
}

impl ServerReply {
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parses a reply token as received by a client
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let text = strip_line_terminator(text);
        match text {
            "CreateAccountSuccess" => Ok(ServerReply::CreateAccountSuccess),
            "CreateAccountFail" => Ok(ServerReply::CreateAccountFail),
            "LoginFail" => Ok(ServerReply::LoginFail),
            _ => match text.strip_prefix(STATE_CHANGE_PREFIX) {
                Some(state) => Ok(ServerReply::StateChange(state.parse()?)),
                None => Err(DecodeError::UnknownReply(text.to_string())),
            },
        }
    }
}

impl fmt::Display for ServerReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerReply::CreateAccountSuccess => f.write_str("CreateAccountSuccess"),
            ServerReply::CreateAccountFail => f.write_str("CreateAccountFail"),
            ServerReply::StateChange(state) => write!(f, "{}{}", STATE_CHANGE_PREFIX, state),
            ServerReply::LoginFail => f.write_str("LoginFail"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_create_account() {
        assert_eq!(
            Command::decode(b"1,alice,secret"),
            Command::CreateAccount {
                username: "alice".to_string(),
                credential: "secret".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_login() {
        assert_eq!(
            Command::parse("2,bob,pw1"),
            Command::Login {
                username: "bob".to_string(),
                credential: "pw1".to_string(),
            }
        );
    }

    #[test]
    fn test_two_fields_is_malformed() {
        assert_eq!(
            Command::parse("x,y"),
            Command::Malformed(DecodeError::TooFewFields(2))
        );
        assert_eq!(
            Command::parse(""),
            Command::Malformed(DecodeError::TooFewFields(1))
        );
    }

    #[test]
    fn test_unknown_signifier_is_malformed() {
        assert_eq!(
            Command::parse("3,alice,secret"),
            Command::Malformed(DecodeError::UnknownSignifier(3))
        );
        assert_eq!(
            Command::parse("one,alice,secret"),
            Command::Malformed(DecodeError::InvalidSignifier("one".to_string()))
        );
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        assert_eq!(
            Command::parse("1,alice,secret,extra"),
            Command::CreateAccount {
                username: "alice".to_string(),
                credential: "secret".to_string(),
            }
        );
    }

    #[test]
    fn test_fields_are_verbatim() {
        assert_eq!(
            Command::parse("2, alice ,pa ss"),
            Command::Login {
                username: " alice ".to_string(),
                credential: "pa ss".to_string(),
            }
        );
    }

    #[test]
    fn test_line_terminator_is_stripped() {
        assert_eq!(
            Command::parse("1,alice,secret\r\n"),
            Command::CreateAccount {
                username: "alice".to_string(),
                credential: "secret".to_string(),
            }
        );
    }

    #[test]
    fn test_state_ack() {
        assert_eq!(
            Command::parse("StateChangedSuccessfully:MainMenu"),
            Command::StateAck {
                reported_state: "MainMenu".to_string(),
            }
        );
        // Unknown names are still acknowledgements
        assert_eq!(
            Command::parse("StateChangedSuccessfully:Credits"),
            Command::StateAck {
                reported_state: "Credits".to_string(),
            }
        );
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        assert_eq!(
            Command::decode(&[0x31, 0x2c, 0xff, 0xfe]),
            Command::Malformed(DecodeError::InvalidUtf8)
        );
    }

    #[test]
    fn test_command_encode() {
        let create = Command::CreateAccount {
            username: "alice".to_string(),
            credential: "secret".to_string(),
        };
        assert_eq!(create.encode().as_deref(), Some("1,alice,secret"));

        let ack = Command::StateAck {
            reported_state: "Lobby".to_string(),
        };
        assert_eq!(
            ack.encode().as_deref(),
            Some("StateChangedSuccessfully:Lobby")
        );

        assert_eq!(
            Command::Malformed(DecodeError::TooFewFields(1)).encode(),
            None
        );
    }

    #[test]
    fn test_reply_tokens() {
        assert_eq!(
            ServerReply::CreateAccountSuccess.to_string(),
            "CreateAccountSuccess"
        );
        assert_eq!(ServerReply::CreateAccountFail.to_string(), "CreateAccountFail");
        assert_eq!(ServerReply::LoginFail.to_string(), "LoginFail");
        assert_eq!(
            ServerReply::StateChange(GameState::MainMenu).encode(),
            b"StateChange:MainMenu".to_vec()
        );
    }

    #[test]
    fn test_reply_parse() {
        assert_eq!(
            ServerReply::parse("StateChange:InGame"),
            Ok(ServerReply::StateChange(GameState::InGame))
        );
        assert_eq!(ServerReply::parse("LoginFail"), Ok(ServerReply::LoginFail));
        assert_eq!(
            ServerReply::parse("StateChange:Credits"),
            Err(DecodeError::UnknownState("Credits".to_string()))
        );
        assert_eq!(
            ServerReply::parse("Hello"),
            Err(DecodeError::UnknownReply("Hello".to_string()))
        );
    }

    #[test]
    fn test_state_names() {
        for state in GameState::ALL {
            assert_eq!(state.name().parse::<GameState>(), Ok(state));
        }
        assert_eq!(GameState::default(), GameState::Login);
    }
}
