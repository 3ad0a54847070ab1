pub mod login;
pub mod session;

pub use login::{
    ChallengeResponse, EmailChallengeResponse, EmailMagicLinkLogin, GoogleChallengeResponse,
    GoogleLogin, LoginChallenge, LoginRequest, LoginResponse, NostrChallengeResponse, NostrLogin,
    RefreshResponse, TokenPair,
};
pub use session::{LoggedInSession, LoginMethod, PersistedSession, Session};
