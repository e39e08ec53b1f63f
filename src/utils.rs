/// Declares a struct together with a `Default` impl built from per-field
/// default expressions (`field: Type = expr`). Fields without an expression
/// fall back to `Default::default()`.
#[macro_export]
macro_rules! default_struct {
    (
        $(#[$struct_meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $type:ty $(= $default:expr)?
            ),* $(,)?
        }
    ) => {
        $(#[$struct_meta])*
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $type
            ),*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $(
                        $field: $crate::default_struct!(@default $($default)?)
                    ),*
                }
            }
        }
    };
    (@default) => {
        Default::default()
    };
    (@default $expr:expr) => {
        $expr
    };
}

/// Discord rejects message content longer than this.
pub const MESSAGE_LIMIT: usize = 2000;

/// Keeps only the first character of a username for log output.
pub fn redact_username(username: &str) -> String {
    match username.chars().next() {
        Some(first) => format!("{}***", first),
        None => "***".to_string(),
    }
}

/// Cuts `text` to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    default_struct! {
        #[derive(Debug)]
        struct Limits {
            pub retries: u32 = 3,
            pub name: String,
        }
    }

    #[test]
    fn default_struct_uses_field_expressions() {
        let limits = Limits::default();
        assert_eq!(limits.retries, 3);
        assert!(limits.name.is_empty());
    }

    #[test]
    fn redacts_all_but_first_character() {
        assert_eq!(redact_username("admin"), "a***");
        assert_eq!(redact_username(""), "***");
    }

    #[test]
    fn truncate_respects_limit() {
        assert_eq!(truncate("short", 10), "short");
        let cut = truncate(&"x".repeat(30), 10);
        assert_eq!(cut.chars().count(), 10);
        assert!(cut.ends_with('…'));
    }
}
