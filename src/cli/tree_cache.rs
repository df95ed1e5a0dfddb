use super::*;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::TreeCacheConfig;

/// Position of a running-config section: the header tokens from the top of
/// the configuration down to the section.
///
/// `show running-config interface 0/1` reads the section at
/// `[interface, 0/1]`; plain `show running-config` reads the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreePath(Vec<String>);

impl TreePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tokens.into_iter().map(Into::into).collect())
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parent(&self) -> Option<TreePath> {
        (!self.is_root()).then(|| Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn starts_with(&self, prefix: &TreePath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn join<I, S>(&self, tokens: I) -> TreePath
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut joined = self.0.clone();
        joined.extend(tokens.into_iter().map(Into::into));
        Self(joined)
    }

    /// This path followed by each ancestor up to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = TreePath> + '_ {
        (0..=self.0.len()).rev().map(|len| Self(self.0[..len].to_vec()))
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

#[derive(Debug)]
struct Section {
    path: TreePath,
    text: String,
    children: Vec<Section>,
}

/// Running-config sections keyed by [`TreePath`].
///
/// Invalidations bump a generation counter; text read from the device or
/// synthesized from an ancestor is only stored when no invalidation ran
/// since it was obtained.
#[derive(Clone)]
pub struct TreeCache {
    cache: Cache<TreePath, String>,
    generation: Arc<AtomicU64>,
    read_prefix: String,
    exit_keywords: Arc<Vec<String>>,
}

impl TreeCache {
    pub fn new(config: &TreeCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .build();
        Self {
            cache,
            generation: Arc::new(AtomicU64::new(0)),
            read_prefix: config.read_prefix.clone(),
            exit_keywords: Arc::new(config.exit_block_keywords.clone()),
        }
    }

    /// The section a read command asks for, or `None` for other commands.
    pub fn path_of(&self, command: &Command) -> Option<TreePath> {
        if command.is_multi_command() {
            return None;
        }
        let rest = command.raw().trim().strip_prefix(self.read_prefix.as_str())?;
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            return None;
        }
        Some(TreePath::new(rest.split_whitespace()))
    }

    /// Cached text for `path`, synthesized from the nearest cached ancestor
    /// when the exact path is missing.
    pub async fn lookup(&self, path: &TreePath) -> Option<String> {
        if let Some(text) = self.cache.get(path).await {
            return Some(text);
        }
        let generation = self.generation();
        for ancestor in path.ancestors().skip(1) {
            let Some(text) = self.cache.get(&ancestor).await else {
                continue;
            };
            let sections = self.parse(&text);
            let mut found = Vec::new();
            collect_matching(&sections, path, &mut found);
            if found.is_empty() {
                continue;
            }
            let synthesized = found.join("\n");
            self.store_if_current(generation, path.clone(), synthesized.clone())
                .await;
            return Some(synthesized);
        }
        None
    }

    pub async fn store(&self, path: TreePath, text: String) {
        self.cache.insert(path, text).await;
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Stores `text` unless an invalidation ran after `generation` was
    /// taken. Returns whether the section was kept.
    pub async fn store_if_current(&self, generation: u64, path: TreePath, text: String) -> bool {
        if self.generation() != generation {
            return false;
        }
        self.cache.insert(path.clone(), text).await;
        if self.generation() != generation {
            self.cache.invalidate(&path).await;
            return false;
        }
        true
    }

    /// Drops `path` and every ancestor; siblings and descendants stay.
    pub async fn invalidate(&self, path: &TreePath) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        for ancestor in path.ancestors() {
            self.cache.invalidate(&ancestor).await;
        }
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.invalidate_all();
    }

    /// Sections changed by a `configure … end` write, or `None` when the
    /// write has another shape.
    pub fn touched_paths(&self, write: &str) -> Option<Vec<TreePath>> {
        let lines: Vec<&str> = write
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if lines.len() < 2
            || lines[0] != "configure"
            || !matches!(lines[lines.len() - 1], "end" | "exit")
        {
            return None;
        }

        let mut context: Vec<TreePath> = Vec::new();
        let mut touched = Vec::new();
        for line in &lines[1..lines.len() - 1] {
            match *line {
                "exit" => {
                    context.pop();
                    continue;
                }
                "end" => {
                    context.clear();
                    continue;
                }
                _ => {}
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let negated = tokens[0] == "no" && tokens.len() > 1;
            let tokens = if negated { &tokens[1..] } else { &tokens[..] };
            let parent = context.last().cloned().unwrap_or_default();

            if self.is_exit_block(tokens[0]) {
                let path = parent.join(tokens.iter().copied());
                if !negated {
                    context.push(path.clone());
                }
                touched.push(path);
            } else {
                touched.push(parent.join([tokens[0]]));
            }
        }
        Some(touched)
    }

    fn is_exit_block(&self, keyword: &str) -> bool {
        self.exit_keywords.iter().any(|k| k == keyword)
    }

    fn parse(&self, text: &str) -> Vec<Section> {
        let lines: Vec<&str> = text.lines().collect();
        self.parse_sections(&lines, &TreePath::root())
    }

    fn parse_sections(&self, lines: &[&str], parent: &TreePath) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i];
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('!') || trimmed == "exit" {
                i += 1;
                continue;
            }
            let indent = indentation(line);
            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            let path = parent.join(tokens.iter().copied());

            let (body_end, next) = if self.is_exit_block(tokens[0]) {
                let end = self.find_exit(lines, i + 1);
                (end, (end + 1).min(lines.len()))
            } else {
                let mut end = i + 1;
                while end < lines.len()
                    && !lines[end].trim().is_empty()
                    && indentation(lines[end]) > indent
                {
                    end += 1;
                }
                (end, end)
            };

            let children = self.parse_sections(&lines[i + 1..body_end], &path);
            sections.push(Section {
                path,
                text: lines[i..next].join("\n"),
                children,
            });
            i = next;
        }
        sections
    }

    /// Index of the `exit` closing a block whose body starts at `from`.
    fn find_exit(&self, lines: &[&str], from: usize) -> usize {
        let mut depth = 0usize;
        for (idx, line) in lines.iter().enumerate().skip(from) {
            let trimmed = line.trim();
            if trimmed == "exit" {
                if depth == 0 {
                    return idx;
                }
                depth -= 1;
            } else if trimmed
                .split_whitespace()
                .next()
                .is_some_and(|first| self.is_exit_block(first))
            {
                depth += 1;
            }
        }
        lines.len()
    }
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Outermost sections at or below `path`.
fn collect_matching(sections: &[Section], path: &TreePath, found: &mut Vec<String>) {
    for section in sections {
        if section.path.starts_with(path) {
            found.push(section.text.clone());
        } else if path.starts_with(&section.path) {
            collect_matching(&section.children, path, found);
        }
    }
}

/// Serves running-config reads from a [`TreeCache`].
///
/// A `configure … end` write invalidates only the sections it touches and
/// their ancestors; any other write clears the whole tree.
pub struct TreeCachingCli<C> {
    inner: C,
    cache: TreeCache,
    channel_id: String,
}

impl<C: Cli> TreeCachingCli<C> {
    pub fn new(inner: C, cache: TreeCache, channel_id: impl Into<String>) -> Self {
        Self {
            inner,
            cache,
            channel_id: channel_id.into(),
        }
    }

    pub fn cache(&self) -> &TreeCache {
        &self.cache
    }

    /// Drops every cached section.
    pub fn clear(&self) {
        self.cache.clear();
    }

    async fn invalidate_for(&self, command: &Command) {
        match self.cache.touched_paths(command.raw()) {
            Some(paths) => {
                for path in paths {
                    debug!("[{}] tree cache invalidates {}", self.channel_id, path);
                    self.cache.invalidate(&path).await;
                }
            }
            None => {
                debug!("[{}] tree cache cleared by '{}'", self.channel_id, command);
                self.cache.clear();
            }
        }
    }
}

#[async_trait]
impl<C: Cli> Cli for TreeCachingCli<C> {
    async fn execute_read(&self, command: &Command) -> Result<String, CliError> {
        let Some(path) = self.cache.path_of(command) else {
            return self.inner.execute_read(command).await;
        };
        if let Some(text) = self.cache.lookup(&path).await {
            debug!("[{}] tree cache hit {}", self.channel_id, path);
            return Ok(text);
        }
        debug!("[{}] tree cache miss {}", self.channel_id, path);
        let generation = self.cache.generation();
        let output = self.inner.execute_read(command).await?;
        if !self
            .cache
            .store_if_current(generation, path.clone(), output.clone())
            .await
        {
            debug!("[{}] {} raced a write, not cached", self.channel_id, path);
        }
        Ok(output)
    }

    async fn execute_write(&self, command: &Command) -> Result<String, CliError> {
        self.invalidate_for(command).await;
        let result = self.inner.execute_write(command).await;
        self.invalidate_for(command).await;
        result
    }

    async fn destroy(&self) -> Result<(), CliError> {
        self.cache.clear();
        self.inner.destroy().await
    }
}
