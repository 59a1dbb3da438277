//! Ports - 抽象化レイヤー
//!
//! core の外側との境界を trait として定義する。
//!
//! # 主要コンポーネント
//! - **KeyedStore / Txn**: 共有 keyed store（set, list, hash, TTL）
//! - **Clock**: 時刻（テストで差し替え可能）
//! - **IdGenerator**: ID を持たない producer 向けの job id
//! - **collaborators**: metadata / script / credential / image の各ステップ

pub mod clock;
pub mod collaborators;
pub mod id_generator;
pub mod keyed_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::collaborators::{
    CredentialIssuer, DefaultImageAssigner, ImageAssigner, JobMetadataSource, JobScriptFetcher,
};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::keyed_store::{KeyedStore, Txn};
