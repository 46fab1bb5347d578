pub mod polls;

use crate::error::PollError;
use actix_web::web;

/// Configures the web app by adding services from each web file.
///
/// @see https://docs.rs/actix-web/4/actix_web/struct.App.html#method.configure
pub fn configure(conf: &mut web::ServiceConfig) {
    // Malformed bodies and query strings use the same error shape as engine failures.
    conf.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _| PollError::Validation(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| PollError::Validation(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _| PollError::Validation(err.to_string()).into()),
    );

    polls::configure(conf);
}
