//! Messages routed through the [`Hub`](crate::hub::Hub).

pub type SessionId = u64;

/// Display name used for announcements the relay makes itself.
pub const SERVER_NAME: &str = "[SERVER]";

/// Who published an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub id: SessionId,
    pub username: String,
}

impl Origin {
    pub fn new(id: SessionId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }

    /// Sessions are numbered from 1, so id 0 never collides with a client.
    pub fn server() -> Self {
        Self::new(0, SERVER_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    User(String),
}

impl Target {
    /// `all` addresses everyone; `/all` is accepted for older clients.
    pub fn parse(selector: &str) -> Self {
        match selector {
            "all" | "/all" => Target::All,
            username => Target::User(username.to_string()),
        }
    }

    pub fn matches(&self, username: &str) -> bool {
        match self {
            Target::All => true,
            Target::User(name) => name == username,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Chat(String),
    Private(String),
    FileOpen { file_name: String },
    FileChunk(Vec<u8>),
    FileClose { file_name: String, complete: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub origin: Origin,
    pub target: Target,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(origin: Origin, target: Target, payload: Payload) -> Self {
        Self {
            origin,
            target,
            payload,
        }
    }

    /// Chat line from the relay itself, addressed to everyone.
    pub fn announcement(text: impl Into<String>) -> Self {
        Self::new(
            Origin::server(),
            Target::All,
            Payload::Chat(format!("{SERVER_NAME}: {}", text.into())),
        )
    }

    pub fn kind(&self) -> &'static str {
        match self.payload {
            Payload::Chat(_) => "chat",
            Payload::Private(_) => "private",
            Payload::FileOpen { .. } => "file-open",
            Payload::FileChunk(_) => "file-chunk",
            Payload::FileClose { .. } => "file-close",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_selector_matches_everyone() {
        assert_eq!(Target::parse("all"), Target::All);
        assert_eq!(Target::parse("/all"), Target::All);
        assert!(Target::All.matches("anyone"));
    }

    #[test]
    fn user_selector_matches_by_name_only() {
        let target = Target::parse("bob");
        assert!(target.matches("bob"));
        assert!(!target.matches("Bob"));
        assert!(!target.matches("alice"));
    }

    #[test]
    fn announcement_comes_from_the_server() {
        let envelope = Envelope::announcement("hello");
        assert_eq!(envelope.origin.id, 0);
        assert_eq!(envelope.target, Target::All);
        assert_eq!(envelope.payload, Payload::Chat("[SERVER]: hello".into()));
    }
}
