use crate::error::{Result, RuntimeError};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

const PLACEHOLDERS: [&str; 4] = ["workspace", "source", "stem", "exe"];

/// Base name of the artifact produced by compiled languages.
pub const EXECUTABLE_NAME: &str = "program";

/// A compile or run command, stored as whitespace-separated tokens.
///
/// Tokens are split before substitution, so a workspace path containing
/// spaces still expands to a single argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    raw: String,
    tokens: Vec<String>,
}

impl CommandTemplate {
    pub fn parse(language: &str, raw: &str) -> Result<Self> {
        let invalid = |reason: String| RuntimeError::InvalidTemplate {
            language: language.to_string(),
            reason,
        };

        let tokens: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
        if tokens.is_empty() {
            return Err(invalid("command is empty".into()));
        }

        for token in &tokens {
            let mut rest = token.as_str();
            while let Some(start) = rest.find('{') {
                let after = &rest[start + 1..];
                let end = after
                    .find('}')
                    .ok_or_else(|| invalid(format!("unterminated placeholder in '{}'", token)))?;
                let name = &after[..end];
                if !PLACEHOLDERS.contains(&name) {
                    return Err(invalid(format!("unknown placeholder {{{}}}", name)));
                }
                rest = &after[end + 1..];
            }
        }

        Ok(Self {
            raw: raw.trim().to_string(),
            tokens,
        })
    }

    pub fn expand(&self, vars: &TemplateVars) -> Vec<String> {
        self.tokens
            .iter()
            .map(|token| {
                token
                    .replace("{workspace}", &vars.workspace)
                    .replace("{source}", &vars.source)
                    .replace("{stem}", &vars.stem)
                    .replace("{exe}", &vars.exe)
            })
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Values substituted into a [`CommandTemplate`] for one workspace.
#[derive(Debug, Clone)]
pub struct TemplateVars {
    pub workspace: String,
    pub source: String,
    pub stem: String,
    pub exe: String,
}

impl TemplateVars {
    pub fn new(dir: &Path, profile: &LanguageProfile) -> Self {
        let exe_name = format!("{}{}", EXECUTABLE_NAME, std::env::consts::EXE_SUFFIX);
        Self {
            workspace: dir.to_string_lossy().into_owned(),
            source: dir.join(profile.source_file()).to_string_lossy().into_owned(),
            stem: profile.stem().to_string(),
            exe: dir.join(exe_name).to_string_lossy().into_owned(),
        }
    }
}

/// Compile/run templates and source naming convention for one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageProfile {
    id: String,
    aliases: Vec<String>,
    source_file: String,
    compile: Option<CommandTemplate>,
    run: CommandTemplate,
    limit_address_space: bool,
}

impl LanguageProfile {
    pub fn new(
        id: impl Into<String>,
        source_file: impl Into<String>,
        compile: Option<&str>,
        run: &str,
    ) -> Result<Self> {
        let id = id.into();
        let source_file = source_file.into();

        if id.trim().is_empty() {
            return Err(RuntimeError::InvalidTemplate {
                language: id,
                reason: "language id is empty".into(),
            });
        }
        if source_file.is_empty()
            || source_file.contains(['/', '\\'])
            || source_file == "."
            || source_file == ".."
        {
            return Err(RuntimeError::InvalidTemplate {
                language: id,
                reason: format!("invalid source file name '{}'", source_file),
            });
        }

        let compile = compile
            .map(|raw| CommandTemplate::parse(&id, raw))
            .transpose()?;
        let run = CommandTemplate::parse(&id, run)?;

        Ok(Self {
            id,
            aliases: Vec::new(),
            source_file,
            compile,
            run,
            limit_address_space: true,
        })
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    /// Runtimes that reserve large virtual mappings up front (the JVM) cannot
    /// run under an address-space ceiling; such profiles opt out and rely on
    /// post-hoc out-of-memory detection.
    pub fn with_address_space_limit(mut self, enabled: bool) -> Self {
        self.limit_address_space = enabled;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn stem(&self) -> &str {
        Path::new(&self.source_file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.source_file)
    }

    pub fn compile(&self) -> Option<&CommandTemplate> {
        self.compile.as_ref()
    }

    pub fn run(&self) -> &CommandTemplate {
        &self.run
    }

    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    pub fn limits_address_space(&self) -> bool {
        self.limit_address_space
    }
}

/// Read-only lookup from language id (or alias) to its profile.
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    profiles: BTreeMap<String, Arc<LanguageProfile>>,
    aliases: BTreeMap<String, String>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with python, cpp and java.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for profile in builtin_profiles() {
            registry.register(profile);
        }
        registry
    }

    /// Adds a profile, replacing any profile already registered under the
    /// same id. Returns the replaced profile.
    pub fn register(&mut self, profile: LanguageProfile) -> Option<Arc<LanguageProfile>> {
        let id = profile.id().to_string();
        self.aliases.retain(|_, target| target != &id);
        for alias in profile.aliases() {
            self.aliases.insert(alias.clone(), id.clone());
        }
        self.profiles.insert(id, Arc::new(profile))
    }

    pub fn resolve(&self, language: &str) -> Result<Arc<LanguageProfile>> {
        let id = self
            .aliases
            .get(language)
            .map(String::as_str)
            .unwrap_or(language);

        self.profiles
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::UnsupportedLanguage(language.to_string()))
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Arc<LanguageProfile>> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn builtin_profiles() -> Vec<LanguageProfile> {
    let python = if cfg!(windows) { "python" } else { "python3" };

    let profiles = [
        LanguageProfile::new("python", "source.py", None, &format!("{} {{source}}", python))
            .map(|p| p.with_aliases(["py", "python3"])),
        LanguageProfile::new(
            "cpp",
            "source.cpp",
            Some("g++ {source} -o {exe} -O2 -std=c++17"),
            "{exe}",
        )
        .map(|p| p.with_aliases(["c++", "cxx"])),
        LanguageProfile::new(
            "java",
            "Main.java",
            Some("javac {source}"),
            "java -cp {workspace} {stem}",
        )
        .map(|p| p.with_address_space_limit(false)),
    ];

    profiles.into_iter().filter_map(|p| p.ok()).collect()
}
