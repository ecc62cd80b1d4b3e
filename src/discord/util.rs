use std::path::PathBuf;

pub const PROJECT_NAME_MAX: usize = 100;

/// Kebab-case a user-supplied project name: lowercase, spaces to dashes,
/// anything outside [a-z0-9-] dropped, capped.
pub fn sanitize_project_name(name: &str) -> String {
    let mut out = String::new();
    for ch in name.trim().to_lowercase().chars() {
        match ch {
            'a'..='z' | '0'..='9' => out.push(ch),
            ' ' | '_' | '-' => {
                if !out.ends_with('-') && !out.is_empty() {
                    out.push('-');
                }
            }
            _ => {}
        }
    }
    let out = out.trim_end_matches('-').to_string();
    out.chars().take(PROJECT_NAME_MAX).collect()
}

/// Escape characters that would break out of a quoted Discord message.
pub fn escape_code_chars(text: &str) -> String {
    text.replace('`', "\\`")
}

/// Expand `~` and resolve a possibly-relative path against the process cwd.
pub fn normalize_path(input: &str) -> PathBuf {
    let input = input.trim();
    if let Some(rest) = input.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if input == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }

    let path = PathBuf::from(input);
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_names_become_kebab_case() {
        assert_eq!(sanitize_project_name("My Cool App"), "my-cool-app");
        assert_eq!(sanitize_project_name("  weird!!name__here "), "weirdname-here");
        assert_eq!(sanitize_project_name("---"), "");
        let long = "a".repeat(200);
        assert_eq!(sanitize_project_name(&long).len(), PROJECT_NAME_MAX);
    }

    #[test]
    fn backticks_are_escaped_for_echo() {
        assert_eq!(escape_code_chars("run `ls`"), "run \\`ls\\`");
    }

    #[test]
    fn tilde_paths_expand() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(normalize_path("~/code"), home.join("code"));
            assert_eq!(normalize_path("~"), home);
        }
        assert!(normalize_path("relative/dir").is_absolute() || std::env::current_dir().is_err());
        assert_eq!(normalize_path("/abs/path"), PathBuf::from("/abs/path"));
    }
}
