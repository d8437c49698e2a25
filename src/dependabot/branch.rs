/// Deterministic source branch naming for update pull requests.
///
/// The name incorporates the ecosystem, target branch, directory and either
/// the dependency group name or the joined dependency names, so that two
/// different logical updates almost never collide while repeated runs of the
/// same logical update always produce the same name. That stability is what
/// makes idempotent re-run detection possible upstream.
const BRANCH_PREFIX: &str = "dependabot";

// Hosting platforms put a ceiling on ref name length; stay comfortably under
// it by truncating only the trailing dependency segment.
const MAX_BRANCH_NAME_LENGTH: usize = 400;

const FALLBACK_SEGMENT: &str = "all-dependencies";

/// Generate the source branch name for one update.
///
/// Pure and deterministic: identical inputs always yield an identical name.
pub fn branch_name_for_update(
    ecosystem: &str,
    target_branch: &str,
    directory: Option<&str>,
    dependency_group_name: Option<&str>,
    dependency_names: &[&str],
    separator: Option<&str>,
) -> String {
    let separator = separator.filter(|s| !s.is_empty()).unwrap_or("/");

    let mut segments = vec![BRANCH_PREFIX.to_string(), sanitize_segment(ecosystem)];
    let target = sanitize_segment(target_branch);
    if !target.is_empty() {
        segments.push(target);
    }
    if let Some(directory) = directory {
        let directory = sanitize_segment(directory.trim_matches('/'));
        if !directory.is_empty() {
            segments.push(directory);
        }
    }

    let leaf = match dependency_group_name {
        Some(group) if !sanitize_segment(group).is_empty() => sanitize_segment(group),
        _ => dependency_segment(dependency_names),
    };

    let prefix = segments.join(separator);
    let budget = MAX_BRANCH_NAME_LENGTH
        .saturating_sub(prefix.len())
        .saturating_sub(separator.len());
    let leaf = truncate_segment(&leaf, budget);

    format!("{prefix}{separator}{leaf}")
}

fn dependency_segment(dependency_names: &[&str]) -> String {
    let mut names: Vec<String> = dependency_names
        .iter()
        .map(|name| sanitize_segment(name))
        .filter(|name| !name.is_empty())
        .collect();
    if names.is_empty() {
        return FALLBACK_SEGMENT.to_string();
    }
    names.sort();
    names.dedup();
    names.join("-and-")
}

/// Strip everything a ref name segment cannot carry: path separators,
/// whitespace and the characters git rejects in refs.
fn sanitize_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_dash = false;
    let mut last_dot = false;
    for c in value.chars() {
        let c = match c {
            c if c.is_ascii_alphanumeric() || c == '.' || c == '_' => c,
            _ => '-',
        };
        if (c == '-' && last_dash) || (c == '.' && last_dot) {
            continue;
        }
        last_dash = c == '-';
        last_dot = c == '.';
        out.push(c);
    }
    let out = out.trim_matches(|c| c == '-' || c == '.').to_string();
    match out.strip_suffix(".lock") {
        Some(stripped) => stripped.to_string(),
        None => out,
    }
}

fn truncate_segment(segment: &str, budget: usize) -> String {
    if segment.len() <= budget {
        return segment.to_string();
    }
    let mut end = budget;
    while end > 0 && !segment.is_char_boundary(end) {
        end -= 1;
    }
    let truncated = segment[..end].trim_end_matches(|c| c == '-' || c == '.');
    if truncated.is_empty() {
        FALLBACK_SEGMENT[..FALLBACK_SEGMENT.len().min(budget.max(1))].to_string()
    } else {
        truncated.to_string()
    }
}
