use crate::error::{YieldError, YieldResult};

/// Widest span a single `a-b` token may expand to.
pub const MAX_RANGE_SPAN: u32 = 10_000;

/// Expand `"24329,24332-24334"` into `[24329, 24332, 24333, 24334]`.
///
/// Descending ranges are swapped, blank tokens ignored, and order and
/// duplicates are kept as written.
pub fn parse_run_list(list: &str) -> YieldResult<Vec<u32>> {
    let mut runs = Vec::new();

    for token in list.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        match token.split_once('-') {
            Some((a, b)) => {
                let mut start = parse_run(a, token)?;
                let mut end = parse_run(b, token)?;
                if end < start {
                    std::mem::swap(&mut start, &mut end);
                }
                if end - start >= MAX_RANGE_SPAN {
                    return Err(YieldError::RunRange(token.to_string()));
                }
                runs.extend(start..=end);
            }
            None => runs.push(parse_run(token, token)?),
        }
    }

    Ok(runs)
}

fn parse_run(text: &str, token: &str) -> YieldResult<u32> {
    text.trim()
        .parse()
        .map_err(|_| YieldError::RunRange(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singles_and_ranges() {
        assert_eq!(
            parse_run_list("6126,6128-6130").unwrap(),
            vec![6126, 6128, 6129, 6130]
        );
    }

    #[test]
    fn descending_range_is_swapped() {
        assert_eq!(parse_run_list("24334-24332").unwrap(), vec![24332, 24333, 24334]);
    }

    #[test]
    fn blanks_and_empty_input() {
        assert!(parse_run_list("").unwrap().is_empty());
        assert_eq!(parse_run_list(" 5, ,6 ,").unwrap(), vec![5, 6]);
    }

    #[test]
    fn duplicates_are_kept() {
        assert_eq!(parse_run_list("24603,24603").unwrap(), vec![24603, 24603]);
    }

    #[test]
    fn oversized_span_is_rejected() {
        assert!(matches!(
            parse_run_list("1-4000000000"),
            Err(YieldError::RunRange(token)) if token == "1-4000000000"
        ));
        assert!(parse_run_list("24329,30000-1").is_err());
        assert_eq!(parse_run_list("1-10000").unwrap().len(), MAX_RANGE_SPAN as usize);
    }

    #[test]
    fn malformed_tokens_fail() {
        assert!(matches!(
            parse_run_list("12,abc"),
            Err(YieldError::RunRange(token)) if token == "abc"
        ));
        assert!(parse_run_list("1-").is_err());
        assert!(parse_run_list("1-2-3").is_err());
        assert!(parse_run_list("-5").is_err());
    }
}
