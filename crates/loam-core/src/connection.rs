//! The storage-facing contract.

use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// A database connection capable of executing parameterized statements.
///
/// This is the only seam between the engine and storage. Drivers receive
/// finished SQL text plus positional parameters; they never see entities,
/// schemas, or relation state. Statement parameters use `$1..$n` placeholders.
///
/// All async methods take a [`Cx`] and return an [`Outcome`] so cancellation
/// propagates through driver I/O.
pub trait Connection: Send + Sync {
    /// Run a statement that produces rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Run a statement that produces no rows; returns the affected count.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Release the connection. Errors here are reportable but the
    /// connection is gone either way.
    fn close(self) -> Result<()>;
}
