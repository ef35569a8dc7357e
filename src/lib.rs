//! Automated job-application agent: navigates a posting, classifies each
//! page, fills forms from an applicant profile, and escalates to a human
//! when it hits credentials, one-time codes, or a page it cannot get past.

pub mod browser;
pub mod checkpoint;
pub mod classifier;
pub mod detect;
pub mod dom;
pub mod fill;
pub mod loopdetect;
pub mod machine;
pub mod mapping;
pub mod profile;
pub mod report;
pub mod tracker;
pub mod types;

#[cfg(test)]
pub mod testutil;
