//! Macros for reducing flow boilerplate.

/// Build a `Vec<Stage>` from lone specs and groups of parallel specs.
///
/// Each element is anything that converts into a [`Stage`](crate::Stage):
/// an [`ActionSpec`](crate::ActionSpec) for a single operation, or an array
/// or `Vec` of specs for operations that run side by side.
///
/// # Example
///
/// ```ignore
/// use tandem_core::{stages, ActionSpec, FlowConfig};
///
/// let config = FlowConfig::new("user/resolveGetUsers", "user/rejectGetUsers")
///     .with_stages(stages![
///         ActionSpec::new(fetch_users),
///         [ActionSpec::new(fetch_roles), ActionSpec::new(fetch_teams)],
///     ]);
/// ```
#[macro_export]
macro_rules! stages {
    ($($stage:expr),* $(,)?) => {
        vec![$($crate::Stage::from($stage)),*]
    };
}
