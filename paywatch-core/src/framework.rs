use sqlx::PgPool;

/// Executes query structs against the connection pool.
///
/// Every query in [`crate::entities`] is a plain struct with a
/// `kanau::processor::Processor` implementation on this type.
#[derive(Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}
