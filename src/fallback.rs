//! Rule-based fallback engine (spec §4.9): answers requests without the LLM
//! when it's slow, unreachable, or its planner output was rejected. Rules
//! are learned from successful LLM responses and persisted to
//! `<home>/.amcp/fallback-rules/<ruleId>.rule`.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A learned or hand-authored responder for requests that loosely match a
/// set of keywords/patterns.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackRule {
    pub id: String,
    pub keywords: Vec<String>,
    pub patterns: Vec<String>,
    pub response_templates: Vec<String>,
    pub category: String,
    pub confidence: u8,
    pub created_at: DateTime<Utc>,
    pub usage_count: u64,
}

impl FallbackRule {
    pub fn new(
        keywords: Vec<String>,
        patterns: Vec<String>,
        response_templates: Vec<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            keywords,
            patterns,
            response_templates,
            category: category.into(),
            confidence: 70,
            created_at: Utc::now(),
            usage_count: 0,
        }
    }

    /// `score = min(100, 40*matchedKeywords/|keywords| + 60*matchedPatterns/|patterns|)`
    pub fn score(&self, request: &str) -> u8 {
        let lower = request.to_lowercase();

        let keyword_term = if self.keywords.is_empty() {
            0.0
        } else {
            let matched = self
                .keywords
                .iter()
                .filter(|kw| lower.contains(kw.to_lowercase().as_str()))
                .count();
            40.0 * matched as f64 / self.keywords.len() as f64
        };

        let pattern_term = if self.patterns.is_empty() {
            0.0
        } else {
            let matched = self
                .patterns
                .iter()
                .filter(|p| {
                    Regex::new(p)
                        .map(|re| re.is_match(request))
                        .unwrap_or(false)
                })
                .count();
            60.0 * matched as f64 / self.patterns.len() as f64
        };

        (keyword_term + pattern_term).min(100.0) as u8
    }

    /// Round-robins through `response_templates` by `usage_count`, so
    /// repeated matches don't always answer with the same template.
    pub fn next_template(&self) -> &str {
        let idx = (self.usage_count as usize) % self.response_templates.len().max(1);
        self.response_templates
            .get(idx)
            .map(|s| s.as_str())
            .unwrap_or("")
    }
}

/// Rules whose `usage_count == 0` and that are older than this are garbage
/// collected.
const STALE_RULE_AGE: chrono::Duration = chrono::Duration::days(30);

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "to", "of", "in", "on", "for", "and", "or",
    "what", "how", "do", "does", "i", "me", "my", "please", "can", "you",
];

pub struct FallbackEngineConfig {
    pub min_confidence: u8,
    pub max_rules: usize,
    pub rules_dir: PathBuf,
}

impl Default for FallbackEngineConfig {
    fn default() -> Self {
        Self {
            min_confidence: 70,
            max_rules: 100,
            rules_dir: default_rules_dir(),
        }
    }
}

/// `<home>/.amcp/fallback-rules`
pub fn default_rules_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".amcp")
        .join("fallback-rules")
}

/// Scores incoming requests against a pool of [`FallbackRule`]s, learns new
/// rules from successful LLM answers, and persists the pool to disk.
pub struct FallbackEngine {
    config: FallbackEngineConfig,
    rules: RwLock<Vec<FallbackRule>>,
}

impl FallbackEngine {
    pub fn new(config: FallbackEngineConfig) -> Self {
        Self {
            config,
            rules: RwLock::new(Vec::new()),
        }
    }

    /// Pick the best-matching rule for `request` and consume its next
    /// template, or `None` if nothing clears `min_confidence`. Ties on score
    /// are broken by higher `confidence`, then most recently created.
    pub async fn respond(&self, request: &str) -> Option<String> {
        let mut rules = self.rules.write().await;
        let best_idx = rules
            .iter()
            .enumerate()
            .map(|(i, r)| (i, r.score(request)))
            .filter(|(_, score)| *score >= self.config.min_confidence)
            .max_by(|(i1, s1), (i2, s2)| {
                s1.cmp(s2)
                    .then(rules[*i1].confidence.cmp(&rules[*i2].confidence))
                    .then(rules[*i1].created_at.cmp(&rules[*i2].created_at))
            })
            .map(|(i, _)| i)?;

        let rule = &mut rules[best_idx];
        let template = rule.next_template().to_string();
        rule.usage_count += 1;
        Some(template)
    }

    /// Learn a rule from a request whose answer came from the LLM: extract
    /// non-stop-word keywords, guess a category, and store the answer as its
    /// sole template. Enforces `max_rules` by dropping the least-used rule.
    pub async fn learn(&self, request: &str, answer: &str) {
        let keywords = extract_keywords(request);
        if keywords.is_empty() {
            return;
        }
        let category = categorize(&keywords);
        let rule = FallbackRule::new(keywords, vec![], vec![answer.to_string()], category);

        let mut rules = self.rules.write().await;
        rules.push(rule);
        if rules.len() > self.config.max_rules {
            if let Some((idx, _)) = rules
                .iter()
                .enumerate()
                .min_by_key(|(_, r)| r.usage_count)
            {
                rules.remove(idx);
            }
        }
    }

    /// Remove rules that have never been used and are older than
    /// [`STALE_RULE_AGE`].
    pub async fn collect_garbage(&self) -> usize {
        let mut rules = self.rules.write().await;
        let before = rules.len();
        let now = Utc::now();
        rules.retain(|r| r.usage_count > 0 || now - r.created_at < STALE_RULE_AGE);
        before - rules.len()
    }

    pub async fn add_rule(&self, rule: FallbackRule) {
        self.rules.write().await.push(rule);
    }

    pub async fn rule_count(&self) -> usize {
        self.rules.read().await.len()
    }

    /// Persist every rule to `<rules_dir>/<ruleId>.rule` in `key=value`
    /// form, one field per line, list fields `|||`-joined.
    pub async fn persist(&self) -> io::Result<()> {
        fs::create_dir_all(&self.config.rules_dir).await?;
        for rule in self.rules.read().await.iter() {
            let path = self.config.rules_dir.join(format!("{}.rule", rule.id));
            fs::write(path, serialize_rule(rule)).await?;
        }
        Ok(())
    }

    /// Load every `*.rule` file from `rules_dir` into the pool, replacing
    /// whatever is currently loaded.
    pub async fn load(&self) -> io::Result<()> {
        let dir = &self.config.rules_dir;
        if !dir.exists() {
            return Ok(());
        }
        let mut loaded = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("rule") {
                continue;
            }
            let contents = fs::read_to_string(&path).await?;
            if let Some(rule) = deserialize_rule(&contents) {
                loaded.push(rule);
            }
        }
        *self.rules.write().await = loaded;
        Ok(())
    }
}

fn extract_keywords(request: &str) -> Vec<String> {
    request
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && w.len() > 2 && !STOP_WORDS.contains(w))
        .map(|w| w.to_string())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect()
}

fn categorize(keywords: &[String]) -> String {
    const CATEGORIES: &[(&str, &[&str])] = &[
        ("weather", &["weather", "temperature", "forecast", "rain"]),
        ("finance", &["stock", "price", "market", "quote"]),
        ("travel", &["flight", "hotel", "itinerary", "trip"]),
    ];
    for (name, hints) in CATEGORIES {
        if keywords.iter().any(|k| hints.contains(&k.as_str())) {
            return name.to_string();
        }
    }
    "general".to_string()
}

fn serialize_rule(rule: &FallbackRule) -> String {
    format!(
        "id={}\nkeywords={}\npatterns={}\nresponse_templates={}\ncategory={}\nconfidence={}\ncreated_at={}\nusage_count={}\n",
        rule.id,
        rule.keywords.join("|||"),
        rule.patterns.join("|||"),
        rule.response_templates.join("|||"),
        rule.category,
        rule.confidence,
        rule.created_at.to_rfc3339(),
        rule.usage_count,
    )
}

fn deserialize_rule(contents: &str) -> Option<FallbackRule> {
    let mut fields = std::collections::HashMap::new();
    for line in contents.lines() {
        if let Some((key, value)) = line.split_once('=') {
            fields.insert(key.to_string(), value.to_string());
        }
    }
    let split_list = |s: &str| -> Vec<String> {
        if s.is_empty() {
            vec![]
        } else {
            s.split("|||").map(|s| s.to_string()).collect()
        }
    };
    Some(FallbackRule {
        id: fields.get("id")?.clone(),
        keywords: split_list(fields.get("keywords")?),
        patterns: split_list(fields.get("patterns")?),
        response_templates: split_list(fields.get("response_templates")?),
        category: fields.get("category")?.clone(),
        confidence: fields.get("confidence")?.parse().ok()?,
        created_at: DateTime::parse_from_rfc3339(fields.get("created_at")?)
            .ok()?
            .with_timezone(&Utc),
        usage_count: fields.get("usage_count")?.parse().ok()?,
    })
}

#[allow(dead_code)]
fn rule_file_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{}.rule", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> FallbackRule {
        FallbackRule::new(
            vec!["weather".to_string(), "forecast".to_string()],
            vec![r"\d+\s*degrees".to_string()],
            vec!["It's mild today.".to_string(), "Expect clouds.".to_string()],
            "weather",
        )
    }

    #[test]
    fn score_combines_keyword_and_pattern_terms() {
        let r = rule();
        // one of two keywords matches -> 40 * 1/2 = 20
        assert_eq!(r.score("what's the weather like"), 20);
        // both keyword terms plus pattern match -> 40 + 60 = 100, capped
        assert_eq!(r.score("weather forecast says 20 degrees"), 100);
    }

    #[test]
    fn next_template_round_robins_by_usage_count() {
        let mut r = rule();
        assert_eq!(r.next_template(), "It's mild today.");
        r.usage_count = 1;
        assert_eq!(r.next_template(), "Expect clouds.");
        r.usage_count = 2;
        assert_eq!(r.next_template(), "It's mild today.");
    }

    #[tokio::test]
    async fn respond_picks_highest_scoring_rule_above_threshold() {
        let engine = FallbackEngine::new(FallbackEngineConfig {
            min_confidence: 50,
            ..Default::default()
        });
        engine.add_rule(rule()).await;
        let answer = engine.respond("weather forecast today").await;
        assert!(answer.is_some());
    }

    #[tokio::test]
    async fn respond_returns_none_below_threshold() {
        let engine = FallbackEngine::new(FallbackEngineConfig {
            min_confidence: 90,
            ..Default::default()
        });
        engine.add_rule(rule()).await;
        assert_eq!(engine.respond("hello there").await, None);
    }

    #[tokio::test]
    async fn learn_adds_a_rule_from_keywords() {
        let engine = FallbackEngine::new(FallbackEngineConfig::default());
        engine.learn("what is the stock price of AAPL", "It's $190.").await;
        assert_eq!(engine.rule_count().await, 1);
    }

    #[tokio::test]
    async fn persist_then_load_roundtrips_rules() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FallbackEngine::new(FallbackEngineConfig {
            rules_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        engine.add_rule(rule()).await;
        engine.persist().await.unwrap();

        let reloaded = FallbackEngine::new(FallbackEngineConfig {
            rules_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.rule_count().await, 1);
    }

    #[tokio::test]
    async fn garbage_collection_drops_unused_stale_rules() {
        let engine = FallbackEngine::new(FallbackEngineConfig::default());
        let mut stale = rule();
        stale.created_at = Utc::now() - chrono::Duration::days(40);
        engine.add_rule(stale).await;
        engine.add_rule(rule()).await; // fresh, kept
        let removed = engine.collect_garbage().await;
        assert_eq!(removed, 1);
        assert_eq!(engine.rule_count().await, 1);
    }
}
