// Permission Scopes

use serde::{Deserialize, Serialize};

/// Caller privilege ladder. Lower level = more privileged, so `System`
/// passes every check and `Guest` only reaches guest routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    System,
    User,
    Guest,
}

impl Scope {
    /// Numeric level used for route filtering and the registration floor.
    pub const fn level(self) -> i32 {
        match self {
            Scope::System => 0,
            Scope::User => 100,
            Scope::Guest => 200,
        }
    }

    /// Whether a caller at this scope may invoke a route requiring `required`.
    pub fn covers(self, required: Scope) -> bool {
        required.level() >= self.level()
    }

    pub const fn name(self) -> &'static str {
        match self {
            Scope::System => "SYSTEM",
            Scope::User => "USER",
            Scope::Guest => "GUEST",
        }
    }
}
