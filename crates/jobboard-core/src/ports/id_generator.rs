//! IdGenerator port - ID 生成の抽象化
//!
//! queue は job id を不透明な文字列として扱うが、RDB の主キーを持たない
//! producer（CLI の simulate、テスト）には一意な ID が必要。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース

use crate::domain::JobId;
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;
}

/// ULID-based generator.
///
/// The timestamp part comes from the injected `Clock`, so ids generated
/// under a `FixedClock` share a prefix and still differ in the random part.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        JobId::new(ulid.to_string())
    }
}
