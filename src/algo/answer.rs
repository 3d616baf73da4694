/// Trims and lowercases each entry.
pub fn normalize(answers: &[String]) -> Vec<String> {
    answers.iter().map(|a| a.trim().to_lowercase()).collect()
}

/// Exact match against the keyed answer, or the first submitted entry appears
/// among the accepted alternatives.
pub fn is_correct(user_answer: &[String], correct_answer: &[String], acceptable: &[String]) -> bool {
    let user = normalize(user_answer);
    if user.is_empty() {
        return false;
    }
    if user == normalize(correct_answer) {
        return true;
    }
    normalize(acceptable).contains(&user[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn matching_ignores_case_and_whitespace() {
        assert!(is_correct(&v(&[" b "]), &v(&["B"]), &[]));
        assert!(!is_correct(&v(&["c"]), &v(&["B"]), &[]));
    }

    #[test]
    fn acceptable_alternatives_count() {
        assert!(is_correct(&v(&["0.5"]), &v(&["1/2"]), &v(&["1/2", ".5", "0.5"])));
        assert!(!is_correct(&v(&["0.25"]), &v(&["1/2"]), &v(&[".5"])));
    }

    #[test]
    fn empty_answer_is_wrong() {
        assert!(!is_correct(&[], &v(&["A"]), &v(&["A"])));
    }
}
