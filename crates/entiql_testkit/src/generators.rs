//! Property-based test generators using proptest.
//!
//! Provides strategies for member data, team layouts, pages and lifecycle
//! operation sequences over the fixture schema.

use crate::fixtures::new_member;
use entiql_core::{CoreResult, EntityManager, EntityRef, Page};
use proptest::prelude::*;

/// Data for one member row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSpec {
    /// Username.
    pub username: String,
    /// Age.
    pub age: i64,
    /// `ADMIN`, `USER` or none.
    pub member_type: Option<&'static str>,
}

impl MemberSpec {
    /// Persists the member, optionally in a team.
    ///
    /// # Errors
    ///
    /// Returns any lifecycle error.
    pub fn persist(&self, em: &mut EntityManager, team: Option<&EntityRef>) -> CoreResult<EntityRef> {
        new_member(em, &self.username, self.age, self.member_type, team)
    }
}

/// Strategy for usernames.
pub fn username_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,11}").expect("Invalid regex")
}

/// Strategy for member types.
pub fn member_type_strategy() -> impl Strategy<Value = Option<&'static str>> {
    prop_oneof![
        2 => Just(Some("USER")),
        1 => Just(Some("ADMIN")),
        1 => Just(None),
    ]
}

/// Strategy for one member.
pub fn member_spec_strategy() -> impl Strategy<Value = MemberSpec> {
    (username_strategy(), 0_i64..100, member_type_strategy()).prop_map(
        |(username, age, member_type)| MemberSpec {
            username,
            age,
            member_type,
        },
    )
}

/// Strategy for a list of members.
pub fn members_strategy(max: usize) -> impl Strategy<Value = Vec<MemberSpec>> {
    prop::collection::vec(member_spec_strategy(), 0..=max)
}

/// Strategy for team layouts: each entry is the member count of one team.
pub fn team_sizes_strategy(max_teams: usize, max_members: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..=max_members, 1..=max_teams)
}

/// Strategy for pages over a result of up to `max` rows.
pub fn page_strategy(max: usize) -> impl Strategy<Value = Page> {
    (0..=max, prop::option::of(0..=max)).prop_map(|(offset, limit)| Page { offset, limit })
}

/// One lifecycle step against a set of members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOp {
    /// Persist a new member.
    Persist(MemberSpec),
    /// Change the age of the n-th live member (modulo the live count).
    Update {
        /// Member index.
        index: usize,
        /// New age.
        age: i64,
    },
    /// Remove the n-th live member (modulo the live count).
    Remove {
        /// Member index.
        index: usize,
    },
    /// Flush pending changes.
    Flush,
}

/// Strategy for one lifecycle step.
pub fn lifecycle_op_strategy() -> impl Strategy<Value = LifecycleOp> {
    prop_oneof![
        3 => member_spec_strategy().prop_map(LifecycleOp::Persist),
        2 => (any::<usize>(), 0_i64..100).prop_map(|(index, age)| LifecycleOp::Update { index, age }),
        1 => any::<usize>().prop_map(|index| LifecycleOp::Remove { index }),
        1 => Just(LifecycleOp::Flush),
    ]
}

/// Strategy for a sequence of lifecycle steps.
pub fn lifecycle_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<LifecycleOp>> {
    prop::collection::vec(lifecycle_op_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 128,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 24,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
