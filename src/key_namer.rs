use uuid::Uuid;

pub const DEFAULT_UPLOAD_PREFIX: &str = "pics";

/// Names uploaded content. Keys are random v4 UUIDs below a logical prefix,
/// keeping the extension of the original file name.
#[derive(Debug, Clone)]
pub struct KeyNamer {
  prefix: String,
}

impl Default for KeyNamer {
  fn default() -> Self {
    Self::new(DEFAULT_UPLOAD_PREFIX)
  }
}

impl KeyNamer {
  pub fn new(prefix: &str) -> Self {
    Self {
      prefix: prefix.trim_end_matches('/').to_owned(),
    }
  }

  pub fn name(&self, original_file_name: &str) -> String {
    format!(
      "{}/{}{}",
      self.prefix,
      Uuid::new_v4(),
      extension(original_file_name)
    )
  }
}

/// `.` plus the last dot-separated segment, or nothing when the name has no dot.
pub fn extension(file_name: &str) -> String {
  match file_name.rsplit_once('.') {
    Some((_, ext)) => format!(".{}", ext),
    None => String::new(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keeps_last_extension_as_is() {
    assert_eq!(extension("a.JPG"), ".JPG");
    assert_eq!(extension("archive.tar.gz"), ".gz");
    assert_eq!(extension(".env"), ".env");
    assert_eq!(extension("b"), "");
    assert_eq!(extension(""), "");
  }

  #[test]
  fn names_live_below_the_prefix() {
    let namer = KeyNamer::new("pics/");
    let key = namer.name("holiday.png");

    let rest = key.strip_prefix("pics/").unwrap();
    let (id, ext) = rest.split_at(36);
    assert!(Uuid::parse_str(id).is_ok());
    assert_eq!(ext, ".png");
  }

  #[test]
  fn names_without_a_dot_get_no_extension() {
    let key = KeyNamer::default().name("README");

    let rest = key.strip_prefix("pics/").unwrap();
    assert_eq!(rest.len(), 36);
    assert!(!rest.contains('.'));
  }

  #[test]
  fn consecutive_names_differ() {
    let namer = KeyNamer::default();
    assert_ne!(namer.name("a.txt"), namer.name("a.txt"));
  }
}
