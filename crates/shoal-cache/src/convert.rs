use shoal_commands::CommandResult;
use shoal_remoting::Response;
use shoal_types::{Address, ShoalError};

pub(crate) fn result_to_response(result: Result<CommandResult, ShoalError>) -> Response {
    match result {
        Ok(r) => Response::Success { successful: r.successful, value: r.value },
        Err(e) => Response::Exception { message: e.to_string() },
    }
}

/// Interpret the response of `target`. No response at all (asynchronous
/// delivery) reads as an empty result.
pub(crate) fn response_to_result(target: &Address, response: Option<&Response>) -> Result<CommandResult, ShoalError> {
    match response {
        None => Ok(CommandResult::empty()),
        Some(Response::Success { successful, value }) => {
            Ok(CommandResult { successful: *successful, value: value.clone() })
        }
        Some(Response::Exception { message }) => Err(ShoalError::remote(target, message)),
        Some(Response::CacheNotFound) => Err(ShoalError::remote(target, "no cache running")),
    }
}
