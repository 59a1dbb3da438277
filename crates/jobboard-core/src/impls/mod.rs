//! Impls - port の実装
//!
//! - **InMemoryStore**: プロセス内メモリの `KeyedStore`（テスト、CLI の
//!   simulate、単一プロセス運用向け）
//!
//! ネットワーク越しの store は別 crate に置く（core をクライアント依存から
//! 切り離すため）。

pub mod inmem_store;

pub use self::inmem_store::InMemoryStore;
