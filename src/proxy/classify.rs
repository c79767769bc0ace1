use axum::http::StatusCode;

/// How a single forwarding attempt ended, as seen by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum AttemptClass {
    /// 2xx/3xx: relay the response and advance rotation past this key.
    Ok,
    /// 4xx: the key is invalid, exhausted or rate-limited; try the next one.
    BadKey,
    /// Anything else (5xx, 1xx): treated as an upstream-wide failure that a
    /// different credential would not fix; relay it without trying further
    /// keys.
    Terminal,
}

pub(super) fn classify_status(status: StatusCode) -> AttemptClass {
    if status.is_success() || status.is_redirection() {
        AttemptClass::Ok
    } else if status.is_client_error() {
        AttemptClass::BadKey
    } else {
        AttemptClass::Terminal
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn success_and_redirect_ranges_count_as_ok() {
        for code in [200u16, 201, 204, 301, 302, 308] {
            let status = StatusCode::from_u16(code).expect("status");
            assert_eq!(classify_status(status), AttemptClass::Ok, "status {code}");
        }
    }

    #[test]
    fn client_errors_mean_a_bad_key() {
        for code in [400u16, 401, 403, 404, 429, 499] {
            let status = StatusCode::from_u16(code).expect("status");
            assert_eq!(
                classify_status(status),
                AttemptClass::BadKey,
                "status {code}"
            );
        }
    }

    #[test]
    fn everything_else_is_terminal() {
        for code in [100u16, 101, 500, 502, 503, 599] {
            let status = StatusCode::from_u16(code).expect("status");
            assert_eq!(
                classify_status(status),
                AttemptClass::Terminal,
                "status {code}"
            );
        }
    }
}
