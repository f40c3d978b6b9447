/// Compares program output against the expected answer.
///
/// Both texts are split into lines, each line loses its trailing
/// whitespace, and trailing empty lines are dropped. Leading and interior
/// blank lines stay significant.
pub fn matches(actual: &str, expected: &str) -> bool {
    normalize(actual) == normalize(expected)
}

fn normalize(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}
