use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What a signed challenge authorizes. Part of the signed text, so a
/// register signature cannot be replayed as a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengePurpose {
    Register,
    Login,
}

impl ChallengePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengePurpose::Register => "register",
            ChallengePurpose::Login => "login",
        }
    }
}

impl fmt::Display for ChallengePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengePurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "register" => Ok(ChallengePurpose::Register),
            "login" => Ok(ChallengePurpose::Login),
            other => Err(format!("unknown challenge purpose '{}'", other)),
        }
    }
}

/// The exact text a wallet signs for register/login. Changing it invalidates
/// outstanding challenges.
pub fn build_auth_message(wallet: &str, nonce: &str, purpose: ChallengePurpose) -> String {
    let action = match purpose {
        ChallengePurpose::Register => "register a new account with",
        ChallengePurpose::Login => "log in with",
    };
    [
        format!("KnowMint wants you to {} your Solana wallet.", action),
        String::new(),
        format!("Wallet: {}", wallet),
        format!("Nonce: {}", nonce),
        String::new(),
        "By signing this message you confirm that you own this wallet.".to_string(),
        "This request does not involve any transaction or transfer of funds.".to_string(),
    ]
    .join("\n")
}
