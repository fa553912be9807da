//! Operation grouping: buckets discovered operations so a single tool never
//! overwhelms an agent. Oversized groups split deterministically by sorted
//! operation id.

use super::openapi::ApiOperation;

#[derive(Debug, Clone)]
pub enum GroupingStrategy {
    /// Bucket by the first OpenAPI tag.
    ByTag,
    /// Bucket by the first path segment.
    ByPathSegment,
    /// Bucket by a regex capture on the path; operations that do not match
    /// fall into `default`.
    ByPattern(regex::Regex),
}

impl Default for GroupingStrategy {
    fn default() -> Self {
        GroupingStrategy::ByTag
    }
}

#[derive(Debug, Clone)]
pub struct OperationGroup {
    pub name: String,
    pub operations: Vec<ApiOperation>,
}

fn bucket_name(strategy: &GroupingStrategy, op: &ApiOperation) -> String {
    match strategy {
        GroupingStrategy::ByTag => op
            .tags
            .first()
            .cloned()
            .unwrap_or_else(|| first_path_segment(&op.path)),
        GroupingStrategy::ByPathSegment => first_path_segment(&op.path),
        GroupingStrategy::ByPattern(re) => re
            .captures(&op.path)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "default".to_string()),
    }
}

fn first_path_segment(path: &str) -> String {
    path.split('/')
        .find(|s| !s.is_empty() && !s.starts_with('{'))
        .unwrap_or("default")
        .to_string()
}

/// Bucket operations, splitting any bucket larger than `max_per_group` into
/// numbered overflow groups by sorted operation id.
pub fn group_operations(
    operations: &[ApiOperation],
    strategy: GroupingStrategy,
    max_per_group: usize,
) -> Vec<OperationGroup> {
    let max_per_group = max_per_group.max(1);
    let mut buckets: Vec<(String, Vec<ApiOperation>)> = Vec::new();
    for op in operations {
        let name = bucket_name(&strategy, op);
        match buckets.iter_mut().find(|(n, _)| *n == name) {
            Some((_, ops)) => ops.push(op.clone()),
            None => buckets.push((name, vec![op.clone()])),
        }
    }
    buckets.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut groups = Vec::new();
    for (name, mut ops) in buckets {
        ops.sort_by(|a, b| a.id.cmp(&b.id));
        if ops.len() <= max_per_group {
            groups.push(OperationGroup {
                name,
                operations: ops,
            });
            continue;
        }
        for (index, chunk) in ops.chunks(max_per_group).enumerate() {
            let group_name = if index == 0 {
                name.clone()
            } else {
                format!("{}_{}", name, index + 1)
            };
            groups.push(OperationGroup {
                name: group_name,
                operations: chunk.to_vec(),
            });
        }
    }
    groups
}
