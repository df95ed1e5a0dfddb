use super::*;
use std::collections::{BTreeMap, HashMap};
use std::fs;

static MODULE: Lazy<Regex> = Lazy::new(|| match Regex::new(r#"(?m)^\s*module\s+"?([\w.-]+)"?\s*\{"#) {
    Ok(re) => re,
    Err(err) => panic!("invalid MODULE regex: {err}"),
});

static REVISION: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r#"(?m)^\s*revision\s+"?(\d{4}-\d{2}-\d{2})"?"#) {
        Ok(re) => re,
        Err(err) => panic!("invalid REVISION regex: {err}"),
    });

static LIST: Lazy<Regex> = Lazy::new(|| match Regex::new(r#"(?m)^\s*list\s+"?([\w.-]+)"?\s*\{"#) {
    Ok(re) => re,
    Err(err) => panic!("invalid LIST regex: {err}"),
});

static KEY: Lazy<Regex> = Lazy::new(|| match Regex::new(r#"(?m)^\s*key\s+"?([^";]+)"?\s*;"#) {
    Ok(re) => re,
    Err(err) => panic!("invalid KEY regex: {err}"),
});

/// What the translation layer needs to know about a model bundle: which
/// modules it defines and how each list is keyed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaContext {
    /// Module name to its latest revision.
    modules: BTreeMap<String, Option<String>>,
    list_keys: HashMap<String, Vec<String>>,
}

impl SchemaContext {
    /// A schema that knows nothing and validates nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Scans every `.yang` file in the model directory.
    pub fn load(model: &Model) -> Result<Self, RegistryError> {
        let load_error = |source| RegistryError::ModelLoad {
            model: model.to_string(),
            dir: model.dir().to_path_buf(),
            source,
        };
        let mut files: Vec<_> = fs::read_dir(model.dir())
            .map_err(load_error)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "yang"))
            .collect();
        files.sort();

        let mut schema = Self::empty();
        for file in &files {
            let text = fs::read_to_string(file).map_err(load_error)?;
            schema.scan(&text);
        }
        debug!(
            "model {} loaded: {} files, {} modules, {} keyed lists",
            model,
            files.len(),
            schema.modules.len(),
            schema.list_keys.len()
        );
        Ok(schema)
    }

    fn scan(&mut self, text: &str) {
        if let Some(module) = MODULE.captures(text) {
            let revision = REVISION
                .captures_iter(text)
                .map(|captures| captures[1].to_string())
                .max();
            self.modules.insert(module[1].to_string(), revision);
        }

        let lists: Vec<(usize, String)> = LIST
            .captures_iter(text)
            .filter_map(|captures| {
                let whole = captures.get(0)?;
                Some((whole.end(), captures[1].to_string()))
            })
            .collect();
        for (idx, (start, name)) in lists.iter().enumerate() {
            let end = lists.get(idx + 1).map_or(text.len(), |(next, _)| *next);
            if let Some(key) = KEY.captures(&text[*start..end]) {
                let keys = key[1].split_whitespace().map(str::to_string).collect();
                self.list_keys.entry(name.clone()).or_insert(keys);
            }
        }
    }

    pub fn with_module(mut self, name: impl Into<String>, revision: Option<&str>) -> Self {
        self.modules
            .insert(name.into(), revision.map(str::to_string));
        self
    }

    pub fn with_list_keys<I, S>(mut self, list: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.list_keys
            .insert(list.into(), keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty() && self.list_keys.is_empty()
    }

    pub fn has_modules(&self) -> bool {
        !self.modules.is_empty()
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn revision(&self, module: &str) -> Option<&str> {
        self.modules.get(module)?.as_deref()
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Key leaves of the list called `list`.
    pub fn list_keys(&self, list: &str) -> Option<&[String]> {
        self.list_keys.get(list).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERFACES: &str = r#"
module openconfig-interfaces {
  namespace "http://openconfig.net/yang/interfaces";
  prefix "oc-if";

  revision "2018-11-21" { description "older"; }
  revision "2019-11-19" { description "newer"; }

  container interfaces {
    list interface {
      key "name";
      leaf name { type string; }
      container subinterfaces {
        list subinterface {
          key "index";
          leaf index { type uint32; }
        }
      }
    }
  }
}
"#;

    #[test]
    fn scans_modules_revisions_and_keys() {
        let mut schema = SchemaContext::empty();
        schema.scan(INTERFACES);
        assert!(schema.has_module("openconfig-interfaces"));
        assert_eq!(schema.revision("openconfig-interfaces"), Some("2019-11-19"));
        assert_eq!(
            schema.list_keys("interface"),
            Some(&["name".to_string()][..])
        );
        assert_eq!(
            schema.list_keys("subinterface"),
            Some(&["index".to_string()][..])
        );
        assert_eq!(schema.list_keys("vlan"), None);
    }

    #[test]
    fn load_reads_yang_files_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("openconfig-interfaces.yang"), INTERFACES).expect("write");
        fs::write(dir.path().join("README.md"), "module bogus {").expect("write");

        let schema = SchemaContext::load(&Model::new("openconfig", "2.4.3", dir.path()))
            .expect("load");
        assert_eq!(schema.modules().collect::<Vec<_>>(), vec!["openconfig-interfaces"]);
    }

    #[test]
    fn missing_directory_is_a_load_error() {
        let err = SchemaContext::load(&Model::new("openconfig", "0.0.0", "/nonexistent/models"))
            .expect_err("missing dir");
        assert!(matches!(err, RegistryError::ModelLoad { .. }));
        assert!(err.to_string().contains("openconfig@0.0.0"));
    }
}
