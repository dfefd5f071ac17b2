//! Binding directory client interface.
//!
//! The directory maps `(userId, serverType)` to the id of the frontend
//! holding the user's session. The core only reads it; frontends write
//! through their own lifecycle and announce changes with
//! [`crate::RpcClient::broadcast_session_bind`].

use async_trait::async_trait;
use meridian_core::ClusterError;

/// Read access to the binding directory.
#[async_trait]
pub trait BindingStorage: Send + Sync {
    /// The id of the frontend of type `frontend_type` holding `uid`'s
    /// session.
    async fn user_frontend_id(
        &self,
        uid: &str,
        frontend_type: &str,
    ) -> Result<String, ClusterError>;
}
