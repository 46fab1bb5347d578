//! Test fixtures for creating test data
#![allow(dead_code)]

use pollster::identity::Identity;
use pollster::polls::{NewPoll, PollStore, PollWithOptions};

pub fn alice() -> Identity {
    Identity::user(1)
}

pub fn bob() -> Identity {
    Identity::user(2)
}

pub fn anonymous() -> Identity {
    Identity::anonymous()
}

pub fn new_poll(title: &str, is_public: bool, options: &[&str]) -> NewPoll {
    NewPoll {
        title: title.to_string(),
        description: None,
        is_public,
        options: options.iter().map(|o| o.to_string()).collect(),
    }
}

/// Create a poll owned by `owner`
pub async fn create_test_poll(
    store: &PollStore,
    owner: &Identity,
    title: &str,
    is_public: bool,
    options: &[&str],
) -> PollWithOptions {
    store
        .create(owner, new_poll(title, is_public, options))
        .await
        .expect("Failed to create poll")
}

/// Option id by its display text
pub fn option_id(poll: &PollWithOptions, text: &str) -> i32 {
    poll.options
        .iter()
        .find(|o| o.text == text)
        .map(|o| o.id)
        .expect("No such option")
}
