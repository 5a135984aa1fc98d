//! 客户端入口：持有已组装的策略链并执行最终成功检查。
//!
//! # Client Layer
//!
//! [`GqlClient`] owns one assembled policy chain over one transport; its
//! builder validates the endpoint, orders the policies, and composes the
//! chain once. [`cancel_pair`] produces the handles callers use to abort
//! in-flight dispatches.

mod builder;
mod core;
mod signals;

pub use builder::GqlClientBuilder;
pub use core::GqlClient;
pub use signals::{cancel_pair, CancelHandle, CancelSignal};
