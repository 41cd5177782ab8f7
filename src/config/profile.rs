//! 服务 `.env` 文件解析
//!
//! `EnvironmentProfile` 在一次运行中只加载一次，之后只读。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// 可选变量的默认值
pub const DEFAULTS: &[(&str, &str)] = &[
    ("WEBUI_PORT", "3000"),
    ("ENABLE_SIGNUP", "true"),
    ("ENABLE_OAUTH_SIGNUP", "false"),
    ("POSTGRES_USER", "postgres"),
    ("POSTGRES_DB", "openwebui"),
    ("LITELLM_DB", "litellm"),
];

/// 占位符关键词，按整词匹配（小写）
const PLACEHOLDER_WORDS: &[&str] = &["changeme", "replaceme", "todo", "your"];

/// 环境配置
#[derive(Clone, Debug, Default)]
pub struct EnvironmentProfile {
    vars: BTreeMap<String, String>,
    source: Option<PathBuf>,
}

impl EnvironmentProfile {
    /// 从文件加载
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::MissingConfigFile(path.to_path_buf()));
            }
            Err(source) => {
                return Err(ConfigError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let vars = parse(&content)?;
        tracing::debug!(path = %path.display(), keys = vars.len(), "Loaded environment file");

        Ok(Self {
            vars,
            source: Some(path.to_path_buf()),
        })
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            source: None,
        }
    }

    /// 补齐未设置的可选变量
    pub fn with_defaults(mut self) -> Self {
        for (key, value) in DEFAULTS {
            self.vars
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// 展开 `${KEY}` 与 `${KEY:-default}`
    ///
    /// 未设置且没有默认值的变量返回 `Err(key)`
    pub fn expand(&self, template: &str) -> Result<String, String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                // 未闭合，按字面量处理
                out.push_str(&rest[start..]);
                return Ok(out);
            };

            let reference = &after[..end];
            match reference.split_once(":-") {
                Some((key, default)) => match self.get(key) {
                    Some(v) if !v.is_empty() => out.push_str(v),
                    _ => out.push_str(default),
                },
                None => match self.get(reference) {
                    Some(v) => out.push_str(v),
                    None => return Err(reference.to_string()),
                },
            }
            rest = &after[end + 1..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

/// 模板中引用的、没有内联默认值的变量
pub fn template_keys(template: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let reference = &after[..end];
        if !reference.contains(":-") && !reference.is_empty() {
            keys.push(reference.to_string());
        }
        rest = &after[end + 1..];
    }
    keys
}

/// 是否为 “尚未设置” 的占位值
pub fn is_placeholder(value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() {
        return true;
    }
    if value.starts_with('<') && value.ends_with('>') {
        return true;
    }
    let lower = value.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    if words
        .iter()
        .any(|w| PLACEHOLDER_WORDS.contains(w) || (w.len() >= 4 && w.chars().all(|c| c == 'x')))
    {
        return true;
    }
    // change-me / replace_me
    words
        .windows(2)
        .any(|pair| pair[1] == "me" && (pair[0] == "change" || pair[0] == "replace"))
}

/// 是否为 `DEFAULTS` 中的可选变量
pub fn has_default(key: &str) -> bool {
    DEFAULTS.iter().any(|(k, _)| *k == key)
}

/// 解析 `KEY=VALUE` 文本
fn parse(content: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut vars = BTreeMap::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let invalid = || ConfigError::InvalidLine {
            line: idx + 1,
            content: raw.to_string(),
        };

        let (key, value) = line.split_once('=').ok_or_else(invalid)?;
        let key = key.trim();
        if !is_valid_key(key) {
            return Err(invalid());
        }

        vars.insert(key.to_string(), parse_value(value.trim()));
    }

    Ok(vars)
}

fn parse_value(value: &str) -> String {
    for quote in ['"', '\''] {
        if let Some(rest) = value.strip_prefix(quote) {
            // 引号内的 # 不是注释
            if let Some(end) = rest.find(quote) {
                let tail = rest[end + 1..].trim_start();
                if tail.is_empty() || tail.starts_with('#') {
                    return rest[..end].to_string();
                }
            }
        }
    }
    // 去掉行尾注释
    match value.find(" #") {
        Some(pos) => value[..pos].trim_end().to_string(),
        None => value.to_string(),
    }
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_file() {
        let content = r#"
# credentials
POSTGRES_PASSWORD=s3cret
export LITELLM_MASTER_KEY="sk-live-123"
WEBUI_NAME='My Stack'
ENABLE_SIGNUP=false # closed beta
EMPTY=
"#;
        let vars = parse(content).unwrap();
        assert_eq!(vars["POSTGRES_PASSWORD"], "s3cret");
        assert_eq!(vars["LITELLM_MASTER_KEY"], "sk-live-123");
        assert_eq!(vars["WEBUI_NAME"], "My Stack");
        assert_eq!(vars["ENABLE_SIGNUP"], "false");
        assert_eq!(vars["EMPTY"], "");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse("GOOD=1\nthis is not valid\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLine { line: 2, .. }));

        let err = parse("1BAD=1").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLine { line: 1, .. }));
    }

    #[test]
    fn test_is_placeholder() {
        assert!(is_placeholder(""));
        assert!(is_placeholder("changeme"));
        assert!(is_placeholder("your-api-key-here"));
        assert!(is_placeholder("sk-xxxxxxxx"));
        assert!(is_placeholder("<openai key>"));
        assert!(!is_placeholder("hunter2-but-longer"));
        assert!(!is_placeholder("false"));
        assert!(is_placeholder("change_me"));
        assert!(is_placeholder("TODO"));
        // 关键词只在整词出现时生效
        assert!(!is_placeholder("mastodon-4f1a9c"));
        assert!(!is_placeholder("yourself42"));
        assert!(!is_placeholder("boxxxxer"));
    }

    #[test]
    fn test_quoted_value_with_trailing_comment() {
        let vars = parse("A=\"abc\" # note\nB='x # y'\nC=\"open\n").unwrap();
        assert_eq!(vars["A"], "abc");
        assert_eq!(vars["B"], "x # y");
        assert_eq!(vars["C"], "\"open");
    }

    #[test]
    fn test_expand() {
        let profile = EnvironmentProfile::from_pairs([("USER", "pg"), ("PASS", "pw")]);
        assert_eq!(
            profile.expand("postgres://${USER}:${PASS}@db:5432").unwrap(),
            "postgres://pg:pw@db:5432"
        );
        assert_eq!(profile.expand("${PORT:-3000}:8080").unwrap(), "3000:8080");
        assert_eq!(profile.expand("${MISSING}").unwrap_err(), "MISSING");
        assert_eq!(profile.expand("literal ${oops").unwrap(), "literal ${oops");
    }

    #[test]
    fn test_template_keys_skip_defaults() {
        assert_eq!(
            template_keys("${A}-${B:-x}-${C}"),
            vec!["A".to_string(), "C".to_string()]
        );
    }

    #[test]
    fn test_with_defaults_keeps_explicit_values() {
        let profile = EnvironmentProfile::from_pairs([("WEBUI_PORT", "8081")]).with_defaults();
        assert_eq!(profile.get("WEBUI_PORT"), Some("8081"));
        assert_eq!(profile.get("ENABLE_SIGNUP"), Some("true"));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EnvironmentProfile::load(&dir.path().join(".env"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingConfigFile(_)));
    }
}
