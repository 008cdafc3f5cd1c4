/// Folder exclusions given on the command line or in settings.
///
/// An entry starting with `/` only matches at the root; any other entry
/// matches a folder of that name at any depth.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludedFolders {
    folders: Vec<String>,
}

impl ExcludedFolders {
    pub fn new<I, S>(folders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut folders = folders
            .into_iter()
            .map(|folder| {
                folder
                    .as_ref()
                    .replace('\\', "/")
                    .trim_end_matches('/')
                    .to_lowercase()
            })
            .filter(|folder| !folder.is_empty())
            .collect::<Vec<_>>();
        folders.sort();
        folders.dedup();
        Self { folders }
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        let rooted_name = format!("/{}", name.replace('\\', "/").to_lowercase());
        self.folders.iter().any(|folder| {
            if folder.starts_with('/') {
                rooted_name.starts_with(&format!("{folder}/"))
            } else {
                rooted_name.contains(&format!("/{folder}/"))
            }
        })
    }
}
