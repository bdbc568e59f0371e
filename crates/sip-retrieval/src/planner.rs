//! Retrieval grouping planner
//!
//! Answers any number of findings with at most `K` backend calls by grouping
//! findings per rubric category and folding overflow categories into the
//! nearest kept one.
//!
//! # Determinism
//!
//! The plan depends only on the multiset of findings: category counts drive
//! bucket selection, ties break on category label, and findings inside a
//! group are sorted before the query text is built.

use crate::category::Category;
use crate::client::RetrievalQuery;
use crate::error::PlannerError;
use crate::finding::Finding;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Default upper bound on retrieval calls per evaluation
pub const DEFAULT_MAX_QUERIES: usize = 3;

/// Default snippets requested per query
pub const DEFAULT_TOP_K: usize = 5;

/// Identifier carried through retrieval so results rejoin their group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupId(pub usize);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Findings answered by one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryGroup {
    pub id: GroupId,
    /// Category that owns the bucket
    pub category: Category,
    /// Every category folded into this bucket, owner included
    pub categories: Vec<Category>,
    pub findings: Vec<Finding>,
    pub query: RetrievalQuery,
}

/// Output of [`RetrievalGroupingPlanner::plan`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryPlan {
    groups: Vec<QueryGroup>,
}

impl QueryPlan {
    #[must_use]
    pub fn groups(&self) -> &[QueryGroup] {
        &self.groups
    }

    /// Number of backend calls the plan issues
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn queries(&self) -> impl Iterator<Item = &RetrievalQuery> {
        self.groups.iter().map(|g| &g.query)
    }

    #[must_use]
    pub fn group(&self, id: GroupId) -> Option<&QueryGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Which group each present category landed in
    #[must_use]
    pub fn assignment(&self) -> BTreeMap<Category, GroupId> {
        self.groups
            .iter()
            .flat_map(|g| g.categories.iter().map(move |c| (*c, g.id)))
            .collect()
    }
}

/// Plans a bounded set of retrieval queries for a list of findings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalGroupingPlanner {
    max_queries: usize,
    top_k: usize,
}

impl RetrievalGroupingPlanner {
    /// # Errors
    /// `PlannerError` if either bound is zero.
    pub fn new(max_queries: usize, top_k: usize) -> Result<Self, PlannerError> {
        if max_queries == 0 {
            return Err(PlannerError::ZeroQueries);
        }
        if top_k == 0 {
            return Err(PlannerError::ZeroTopK);
        }
        Ok(Self { max_queries, top_k })
    }

    #[must_use]
    pub fn max_queries(&self) -> usize {
        self.max_queries
    }

    #[must_use]
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Group `findings` into at most `max_queries` queries.
    ///
    /// Empty input yields an empty plan; any non-empty input yields at least
    /// one query.
    #[must_use]
    pub fn plan(&self, findings: &[Finding]) -> QueryPlan {
        let mut by_category: BTreeMap<Category, Vec<Finding>> = BTreeMap::new();
        for finding in findings {
            by_category
                .entry(finding.category())
                .or_default()
                .push(finding.clone());
        }
        if by_category.is_empty() {
            return QueryPlan::default();
        }

        let kept = self.select_buckets(&by_category);
        let mut buckets: BTreeMap<Category, (Vec<Category>, Vec<Finding>)> = kept
            .iter()
            .map(|c| (*c, (Vec::new(), Vec::new())))
            .collect();

        for (category, members) in by_category {
            let owner = nearest(category, &kept);
            if owner != category {
                tracing::debug!(from = %category, into = %owner, "merging overflow category");
            }
            if let Some((categories, bucket)) = buckets.get_mut(&owner) {
                categories.push(category);
                bucket.extend(members);
            }
        }

        let groups: Vec<QueryGroup> = buckets
            .into_iter()
            .enumerate()
            .map(|(i, (category, (categories, mut findings)))| {
                findings.sort();
                let query = RetrievalQuery::new(compose_query(category, &findings), self.top_k);
                QueryGroup {
                    id: GroupId(i),
                    category,
                    categories,
                    findings,
                    query,
                }
            })
            .collect();

        tracing::debug!(
            findings = findings.len(),
            queries = groups.len(),
            limit = self.max_queries,
            "retrieval plan built"
        );
        QueryPlan { groups }
    }

    /// The `max_queries` largest categories; equal counts go alphabetically.
    fn select_buckets(&self, by_category: &BTreeMap<Category, Vec<Finding>>) -> Vec<Category> {
        let mut ranked: Vec<(Category, usize)> =
            by_category.iter().map(|(c, f)| (*c, f.len())).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.label().cmp(b.0.label())));
        ranked.truncate(self.max_queries);
        let mut kept: Vec<Category> = ranked.into_iter().map(|(c, _)| c).collect();
        kept.sort();
        kept
    }
}

impl Default for RetrievalGroupingPlanner {
    fn default() -> Self {
        Self {
            max_queries: DEFAULT_MAX_QUERIES,
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// Closest kept category by framework distance, ties broken alphabetically.
fn nearest(category: Category, kept: &[Category]) -> Category {
    kept.iter()
        .copied()
        .min_by(|a, b| {
            category
                .distance(*a)
                .cmp(&category.distance(*b))
                .then_with(|| a.label().cmp(b.label()))
        })
        .unwrap_or(category)
}

fn compose_query(category: Category, findings: &[Finding]) -> String {
    let body: Vec<&str> = findings.iter().map(|f| f.text.as_str()).collect();
    format!("{}: {}", category.label(), body.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn f(text: &str, category: Category) -> Finding {
        Finding::new(text).with_category(category)
    }

    #[test]
    fn rejects_zero_bounds() {
        assert_eq!(RetrievalGroupingPlanner::new(0, 5), Err(PlannerError::ZeroQueries));
        assert_eq!(RetrievalGroupingPlanner::new(3, 0), Err(PlannerError::ZeroTopK));
    }

    #[test]
    fn empty_input_issues_no_queries() {
        assert!(RetrievalGroupingPlanner::default().plan(&[]).is_empty());
    }

    #[test]
    fn single_category_is_one_query() {
        let plan = RetrievalGroupingPlanner::default().plan(&[
            f("Lessons are engaging", Category::TeachingAndAssessment),
            f("Assessment informs planning", Category::TeachingAndAssessment),
        ]);
        assert_eq!(plan.len(), 1);
        assert_eq!(
            plan.groups()[0].query.text,
            "Teaching and assessment: Assessment informs planning; Lessons are engaging"
        );
        assert_eq!(plan.groups()[0].query.top_k, DEFAULT_TOP_K);
    }

    #[test]
    fn overflow_merges_into_nearest_kept_bucket() {
        use Category::*;
        let findings = vec![
            f("a1", StudentsAchievement),
            f("a2", StudentsAchievement),
            f("a3", StudentsAchievement),
            f("t1", TeachingAndAssessment),
            f("t2", TeachingAndAssessment),
            f("l1", LeadershipAndManagement),
            f("l2", LeadershipAndManagement),
            f("p1", PersonalDevelopment),
            f("c1", Curriculum),
            f("s1", ProtectionCareGuidance),
        ];
        let plan = RetrievalGroupingPlanner::default().plan(&findings);
        assert_eq!(plan.len(), 3);

        let assignment = plan.assignment();
        // personal (2) is one step from both achievement (1) and teaching (3): alphabetical wins
        assert_eq!(assignment[&PersonalDevelopment], assignment[&StudentsAchievement]);
        assert_eq!(assignment[&Curriculum], assignment[&TeachingAndAssessment]);
        assert_eq!(assignment[&ProtectionCareGuidance], assignment[&LeadershipAndManagement]);
        assert_eq!(plan.groups().iter().map(|g| g.findings.len()).sum::<usize>(), 10);
    }

    #[test]
    fn equal_counts_keep_alphabetical_categories() {
        use Category::*;
        let findings: Vec<Finding> = Category::ALL
            .iter()
            .map(|c| f(c.label(), *c))
            .collect();
        let plan = RetrievalGroupingPlanner::new(2, 5).unwrap().plan(&findings);
        let owners: Vec<Category> = plan.groups().iter().map(|g| g.category).collect();
        // "Curriculum" and "Leadership and management" sort first
        assert_eq!(owners, vec![Curriculum, LeadershipAndManagement]);
    }
}
