//! Backend dispatch macro.
//!
//! Generates the match over [`DbPool`](crate::db::DbPool) variants so each call
//! site lists one arm per backend and nothing else.

/// Dispatch over `DbPool` variants.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => p.close().await,
///     SQLite(p) => p.close().await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}
