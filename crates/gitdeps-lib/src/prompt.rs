use std::io::{BufRead, Write};

/// Asks the user whether modified files may be overwritten.
pub trait ConflictPrompt: Send + Sync {
    fn confirm_overwrite(&self, files: &[String]) -> bool;
}

/// Reads the answer from stdin; only `y` or `Y` accepts.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

impl ConflictPrompt for StdinPrompt {
    fn confirm_overwrite(&self, files: &[String]) -> bool {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "The following file(s) have been modified:");
        for file in files {
            let _ = writeln!(stderr, "  {}", file);
        }
        let _ = write!(stderr, "Would you like to overwrite your changes (y/n)? ");
        let _ = stderr.flush();
        drop(stderr);

        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        is_affirmative(&answer)
    }
}

/// Answers every prompt the same way.
#[derive(Debug, Clone, Copy)]
pub struct FixedPrompt(pub bool);

impl ConflictPrompt for FixedPrompt {
    fn confirm_overwrite(&self, _files: &[String]) -> bool {
        self.0
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim(), "y" | "Y")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_y_is_affirmative() {
        assert!(is_affirmative("y\n"));
        assert!(is_affirmative(" Y "));
        assert!(!is_affirmative("yes"));
        assert!(!is_affirmative(""));
        assert!(!is_affirmative("n"));
    }
}
