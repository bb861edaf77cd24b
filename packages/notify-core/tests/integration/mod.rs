//! Integration tests driving change computation through the reference store.
//!
//! 1. Table changes
//! 2. List changes
//! 3. Deep changes through links
//! 4. Object and derived view observation
//! 5. Randomized properties

pub mod deep_change_tests;
pub mod helpers;
pub mod list_change_tests;
pub mod observation_tests;
pub mod property_tests;
pub mod table_change_tests;
