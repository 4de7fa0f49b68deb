use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use datasync_core::Category;
use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::job::Job;

/// All known jobs, keyed by name, remembering registration order.
///
/// Registration order is the only ordering the system guarantees: `all_names`
/// and `select` always return jobs in the order they were registered.
#[derive(Default)]
pub struct Registry {
    jobs: HashMap<String, Arc<dyn Job>>,
    ordered_names: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. A second job with the same name is a configuration error.
    pub fn register(&mut self, job: Arc<dyn Job>) -> Result<()> {
        let name = job.name().to_string();
        if self.jobs.contains_key(&name) {
            return Err(SchedulerError::DuplicateJob { name });
        }
        debug!(job = %name, category = %job.category(), cadence = %job.cadence(), "job registered");
        self.ordered_names.push(name.clone());
        self.jobs.insert(name, job);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Job>> {
        self.jobs
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::JobNotFound {
                name: name.to_string(),
            })
    }

    pub fn all_names(&self) -> &[String] {
        &self.ordered_names
    }

    pub fn len(&self) -> usize {
        self.ordered_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered_names.is_empty()
    }

    /// Jobs matching both filters, in registration order. `None` = no restriction.
    ///
    /// Unknown names fail the whole selection; nothing is partially selected.
    /// When both filters are given a named job must also match the category.
    pub fn select(
        &self,
        category: Option<Category>,
        names: Option<&HashSet<String>>,
    ) -> Result<Vec<Arc<dyn Job>>> {
        if let Some(names) = names {
            let unknown: BTreeSet<&String> = names
                .iter()
                .filter(|n| !self.jobs.contains_key(n.as_str()))
                .collect();
            if !unknown.is_empty() {
                return Err(SchedulerError::UnknownJobs {
                    names: unknown.into_iter().cloned().collect(),
                });
            }
        }

        let selected = self
            .ordered_names
            .iter()
            .filter(|n| names.map_or(true, |set| set.contains(n.as_str())))
            .filter_map(|n| self.jobs.get(n))
            .filter(|job| category.map_or(true, |c| job.category() == c))
            .cloned()
            .collect();
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use datasync_core::{Cadence, RunOutcome};

    use crate::error::JobError;
    use crate::job::JobContext;

    struct Named(&'static str, Category);

    #[async_trait]
    impl Job for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn storage_target(&self) -> &str {
            "test"
        }
        fn category(&self) -> Category {
            self.1
        }
        fn cadence(&self) -> Cadence {
            Cadence::Daily
        }
        fn is_due(&self, _: DateTime<Utc>, _: Option<DateTime<Utc>>) -> bool {
            true
        }
        async fn execute(&self, _: &JobContext) -> std::result::Result<RunOutcome, JobError> {
            Ok(RunOutcome::default())
        }
    }

    fn registry() -> Registry {
        let mut r = Registry::new();
        r.register(Arc::new(Named("a", Category::Tier1))).unwrap();
        r.register(Arc::new(Named("b", Category::Tier2))).unwrap();
        r.register(Arc::new(Named("c", Category::Tier1))).unwrap();
        r
    }

    fn names(jobs: &[Arc<dyn Job>]) -> Vec<&str> {
        jobs.iter().map(|j| j.name()).collect()
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut r = registry();
        let err = r.register(Arc::new(Named("b", Category::Tier3))).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateJob { ref name } if name == "b"));
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn get_unknown_is_not_found() {
        let r = registry();
        assert_eq!(r.get("c").unwrap().name(), "c");
        assert!(matches!(
            r.get("zz"),
            Err(SchedulerError::JobNotFound { .. })
        ));
    }

    #[test]
    fn select_all_in_registration_order() {
        let r = registry();
        assert_eq!(r.all_names(), ["a", "b", "c"]);
        assert_eq!(names(&r.select(None, None).unwrap()), ["a", "b", "c"]);
    }

    #[test]
    fn select_by_category_keeps_order() {
        let r = registry();
        let jobs = r.select(Some(Category::Tier1), None).unwrap();
        assert_eq!(names(&jobs), ["a", "c"]);
        assert!(r.select(Some(Category::Tier4), None).unwrap().is_empty());
    }

    #[test]
    fn select_by_names_uses_registration_order() {
        let r = registry();
        let jobs = r.select(None, Some(&set(&["c", "a"]))).unwrap();
        assert_eq!(names(&jobs), ["a", "c"]);
    }

    #[test]
    fn unknown_name_fails_whole_selection() {
        let r = registry();
        match r.select(None, Some(&set(&["a", "z", "y"]))) {
            Err(SchedulerError::UnknownJobs { names }) => assert_eq!(names, ["y", "z"]),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(jobs) => panic!("selected {} jobs", jobs.len()),
        }
    }

    #[test]
    fn names_and_category_combine_with_and() {
        let r = registry();
        let jobs = r
            .select(Some(Category::Tier1), Some(&set(&["a", "b"])))
            .unwrap();
        assert_eq!(names(&jobs), ["a"]);
    }
}
