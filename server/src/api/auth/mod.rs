//! Authentication module

pub mod bypass;
mod context;
pub mod directory;
mod extractors;
pub mod forward;
mod manager;
pub mod middleware;
pub mod oidc;
pub mod password;
pub mod session;
pub mod setup;
pub mod trust;

pub use context::{AuthContext, role_from_groups};
pub use directory::{Account, AccountView, UserDirectory};
pub use extractors::{AdminUser, CurrentUser};
pub use manager::{AccountUpdate, AuthManager, Resolution, password_error};
pub use middleware::{authenticate, require_admin, require_role, require_user};
pub use oidc::{HttpOidcProvider, OidcError, OidcFlow, OidcProvider};
pub use session::{Session, SessionRegistry};
pub use setup::{MethodRequest, MethodResponse, SetupError, setup_guard};
pub use trust::{TrustModel, TrustModelCell};

#[cfg(test)]
pub(crate) use manager::testing;
