//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{Challenge, ChallengeSource, Evaluation, GamePhase, GameSession, Level, ServiceHealth};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    Status,
    NewChallenge {
        level: u8,
    },
    StartGame,
    SubmitAnswer {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "selectedOption")]
        selected_option: String,
    },
    NextLevel {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Restart {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Challenge {
        challenge: Challenge,
    },
    Game {
        game: GameOut,
    },
    Feedback {
        evaluation: Evaluation,
        game: GameOut,
    },
    ServiceStatus {
        service: ServiceHealth,
    },
    Error {
        message: String,
    },
}

/// Challenge as shown while a session is playing: no answer key.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeOut {
    pub level: Level,
    pub text: String,
    pub options: Vec<String>,
    pub source: ChallengeSource,
}

/// DTO used by both WS and HTTP for session delivery.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOut {
    pub id: String,
    pub level: Level,
    pub score: u32,
    pub phase: GamePhase,
    pub challenge: ChallengeOut,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Evaluation>,
    pub service: ServiceHealth,
}

pub fn to_out(c: &Challenge) -> ChallengeOut {
    ChallengeOut {
        level: c.level,
        text: c.text.clone(),
        options: c.options.clone(),
        source: c.source,
    }
}

pub fn game_out(s: &GameSession, service: ServiceHealth) -> GameOut {
    GameOut {
        id: s.id.clone(),
        level: s.level,
        score: s.score,
        phase: s.phase,
        challenge: to_out(&s.challenge),
        feedback: s.feedback.clone(),
        service,
    }
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct ChallengeQuery {
    pub level: Option<u8>,
}

#[derive(Deserialize)]
pub struct AnswerIn {
    #[serde(rename = "selectedOption")]
    pub selected_option: String,
}
#[derive(Serialize)]
pub struct AnswerOut {
    pub evaluation: Evaluation,
    pub game: GameOut,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub service: ServiceHealth,
}

#[derive(Serialize)]
pub struct ErrorOut {
    pub error: String,
}
