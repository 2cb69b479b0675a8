use std::fmt;

/// The principal a mutation is stamped with. Resolved to a display name once,
/// at the call boundary; everything below the db layer only sees the string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    AuthenticatedUser(String),
    SystemProcess(&'static str),
    Unknown,
}

pub const SYSTEM_CRON: Actor = Actor::SystemProcess("System Cron");
pub const SYSTEM_MIDDLEWARE: Actor = Actor::SystemProcess("Middleware System");
pub const SYSTEM_SEED: Actor = Actor::SystemProcess("System Seed");

impl Actor {
    pub fn username(name: impl Into<String>) -> Self {
        Actor::AuthenticatedUser(name.into())
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::AuthenticatedUser(name) => f.write_str(name),
            Actor::SystemProcess(label) => f.write_str(label),
            Actor::Unknown => f.write_str("anonymous"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_display() {
        assert_eq!(Actor::username("amal").to_string(), "amal");
        assert_eq!(SYSTEM_CRON.to_string(), "System Cron");
        assert_eq!(SYSTEM_MIDDLEWARE.to_string(), "Middleware System");
        assert_eq!(Actor::Unknown.to_string(), "anonymous");
    }
}
