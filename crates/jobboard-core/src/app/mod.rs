//! App - アプリケーション層
//!
//! queue と collaborator ports を組み合わせる host 側のロジック。
//!
//! # 主要コンポーネント
//! - **FetchJob**: claim 済み job の descriptor 組み立て
//! - **ReconcileLoop**: reconciler の定期実行

pub mod fetch_job;
pub mod reconcile_loop;

pub use self::fetch_job::FetchJob;
pub use self::reconcile_loop::ReconcileLoop;
