mod error;
mod gateway;
#[cfg(test)]
pub(crate) mod testing;
pub(crate) mod transport;

pub use error::ApiError;
pub use gateway::ApiClient;
pub use transport::{ApiRequest, ApiResponse, FormPart, HttpTransport, RequestBody, Transport};
