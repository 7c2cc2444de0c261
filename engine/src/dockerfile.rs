//! Dockerfile parser.
//!
//! Parses a Dockerfile into its base image and a sequence of build
//! instructions. Supports the `# escape=` parser directive, line
//! continuations, comments, and both shell and JSON (exec) forms.
//!
//! Argument text is kept exactly as written: quotes, escapes and variable
//! references are left for the instructions to resolve at build time.

use std::path::Path;

use a3s_build_core::error::{BuildError, Result};

use crate::args::BuildArgs;
use crate::instruction::{
    ArgCommand, CmdCommand, CommandForm, CopyCommand, EntrypointCommand, EnvCommand,
    ExposeCommand, Instruction, LabelCommand, OnBuildCommand, RunCommand, ShellCommand,
    StopSignalCommand, UserCommand, VolumeCommand, WorkdirCommand,
};
use crate::resolve::{MissingPolicy, ReplacementEnv, Resolver, DEFAULT_ESCAPE};

/// `FROM <image> [AS <alias>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseImage {
    pub image: String,
    pub alias: Option<String>,
}

/// Parsed Dockerfile.
#[derive(Debug, Clone)]
pub struct Dockerfile {
    /// Escape character from the `# escape=` directive
    pub escape: char,
    /// `ARG` instructions before `FROM`
    pub meta_args: Vec<ArgCommand>,
    pub base: BaseImage,
    /// Instructions after `FROM`, in order
    pub instructions: Vec<Instruction>,
    /// Source line of each instruction
    lines: Vec<usize>,
}

impl Dockerfile {
    /// Parse a Dockerfile from its text content.
    pub fn parse(content: &str) -> Result<Self> {
        Self::parse_with_escape(content, DEFAULT_ESCAPE)
    }

    /// Parse with `default_escape` in effect unless an `# escape=` directive
    /// overrides it.
    pub fn parse_with_escape(content: &str, default_escape: char) -> Result<Self> {
        let escape = parse_directives(content, default_escape)?;
        let mut meta_args = Vec::new();
        let mut base = None;
        let mut instructions = Vec::new();
        let mut lines = Vec::new();

        for (line_num, line) in logical_lines(content, escape) {
            match parse_line(&line, line_num, escape)? {
                Parsed::From(image) => {
                    if base.is_some() {
                        return Err(BuildError::parse(
                            line_num,
                            "multi-stage builds are not supported (second FROM)",
                        ));
                    }
                    base = Some(image);
                }
                Parsed::Instruction(instruction) => match (&base, instruction) {
                    (None, Instruction::Arg(arg)) => meta_args.push(arg),
                    (None, _) => {
                        return Err(BuildError::parse(
                            line_num,
                            "First instruction must be FROM (or ARG before FROM)",
                        ))
                    }
                    (Some(_), instruction) => {
                        instructions.push(instruction);
                        lines.push(line_num);
                    }
                },
                Parsed::Skipped => {}
            }
        }

        let base = base.ok_or_else(|| {
            BuildError::parse(
                content.lines().count(),
                "Dockerfile is empty or contains no FROM instruction",
            )
        })?;

        Ok(Dockerfile {
            escape,
            meta_args,
            base,
            instructions,
            lines,
        })
    }

    /// Parse a Dockerfile from a file path, with `default_escape` applying
    /// unless the file carries an `# escape=` directive.
    pub fn from_file(path: &Path, default_escape: char) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BuildError::ConfigError(format!(
                "Failed to read Dockerfile at {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse_with_escape(&content, default_escape)
    }

    /// Source line of the instruction at `step`.
    pub fn line_of(&self, step: usize) -> Option<usize> {
        self.lines.get(step).copied()
    }

    /// Declare the meta arguments in `args` and resolve the base image
    /// reference against them.
    pub fn resolve_base(&self, args: &mut BuildArgs) -> Result<String> {
        let no_env: [(String, String); 0] = [];
        for arg in &self.meta_args {
            let default = match &arg.default {
                Some(raw) => {
                    let env = ReplacementEnv::new(&no_env, args);
                    Some(
                        Resolver::new(&env, MissingPolicy::Empty)
                            .escape(self.escape)
                            .strip_quotes(true)
                            .resolve(raw)?,
                    )
                }
                None => None,
            };
            args.declare(&arg.name, default);
        }

        let env = ReplacementEnv::new(&no_env, args);
        let image = Resolver::new(&env, MissingPolicy::Empty)
            .escape(self.escape)
            .strip_quotes(true)
            .resolve(&self.base.image)?;
        if image.is_empty() {
            return Err(BuildError::validation(
                "FROM",
                &self.base.image,
                "base image name resolved to an empty string",
            ));
        }
        Ok(image)
    }
}

enum Parsed {
    From(BaseImage),
    Instruction(Instruction),
    Skipped,
}

/// Read the parser directives at the top of the file.
fn parse_directives(content: &str, default_escape: char) -> Result<char> {
    let mut escape = default_escape;
    for (idx, line) in content.lines().enumerate() {
        let Some(body) = line.trim().strip_prefix('#') else {
            break;
        };
        let Some((key, value)) = body.split_once('=') else {
            break;
        };
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            break;
        }
        if key.eq_ignore_ascii_case("escape") {
            escape = match value.trim() {
                "\\" => '\\',
                "`" => '`',
                other => {
                    return Err(BuildError::parse(
                        idx + 1,
                        format!("invalid escape token '{}' (must be \\ or `)", other),
                    ))
                }
            };
        }
    }
    Ok(escape)
}

/// Join continuation lines into logical lines, dropping comments and blank
/// lines. Each logical line carries the number of its first physical line.
fn logical_lines(content: &str, escape: char) -> Vec<(usize, String)> {
    let mut logical = Vec::new();
    let mut current = String::new();
    let mut start = 0;
    let mut continuing = false;

    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if !continuing {
            start = idx + 1;
        }

        let line = if continuing {
            line.trim()
        } else {
            line.trim_end()
        };
        match line.strip_suffix(escape) {
            Some(head) => {
                current.push_str(head.trim_end());
                current.push(' ');
                continuing = true;
            }
            None => {
                current.push_str(line);
                logical.push((start, std::mem::take(&mut current)));
                continuing = false;
            }
        }
    }

    // Trailing continuation without a final line
    if !current.trim().is_empty() {
        logical.push((start, current));
    }
    logical
}

/// Parse a single logical line.
fn parse_line(line: &str, line_num: usize, escape: char) -> Result<Parsed> {
    let (keyword, rest) = split_first_word(line);
    let keyword_upper = keyword.to_ascii_uppercase();

    let instruction = match keyword_upper.as_str() {
        "FROM" => return parse_from(rest, line_num, escape).map(Parsed::From),
        "ARG" => parse_arg(rest, line_num, escape)?,
        "ENV" => parse_env(rest, line_num, escape)?,
        "LABEL" => parse_label(rest, line_num, escape)?,
        "EXPOSE" => Instruction::Expose(ExposeCommand {
            ports: required_words("EXPOSE", rest, line_num, escape)?,
        }),
        "USER" => Instruction::User(UserCommand {
            user: single_word("USER", rest, line_num, escape)?,
        }),
        "WORKDIR" => Instruction::Workdir(WorkdirCommand::new(required("WORKDIR", rest, line_num)?)),
        "VOLUME" => parse_volume(rest, line_num, escape)?,
        "STOPSIGNAL" => Instruction::StopSignal(StopSignalCommand::new(single_word(
            "STOPSIGNAL",
            rest,
            line_num,
            escape,
        )?)),
        "SHELL" => parse_shell(rest, line_num)?,
        "ONBUILD" => Instruction::OnBuild(OnBuildCommand {
            trigger: required("ONBUILD", rest, line_num)?,
        }),
        "ENTRYPOINT" => Instruction::Entrypoint(EntrypointCommand {
            form: parse_command_form("ENTRYPOINT", rest, line_num)?,
        }),
        "CMD" => Instruction::Cmd(CmdCommand {
            form: parse_command_form("CMD", rest, line_num)?,
        }),
        "COPY" => parse_copy(rest, line_num, escape)?,
        "RUN" => {
            if rest.starts_with("--") {
                return Err(BuildError::parse(line_num, "RUN flags are not supported"));
            }
            Instruction::Run(RunCommand::new(parse_command_form("RUN", rest, line_num)?))
        }
        "ADD" | "HEALTHCHECK" | "MAINTAINER" => {
            tracing::warn!(
                line = line_num,
                instruction = keyword_upper.as_str(),
                "Unsupported Dockerfile instruction, skipping"
            );
            return Ok(Parsed::Skipped);
        }
        _ => {
            return Err(BuildError::parse(
                line_num,
                format!("Unknown instruction '{}'", keyword),
            ))
        }
    };
    Ok(Parsed::Instruction(instruction))
}

/// Split a string into the first word and the rest.
fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

/// Split on whitespace outside quotes. Quotes and escapes stay in the
/// words.
fn split_words(s: &str, escape: char) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some('\'') => {
                current.push(c);
                if c == '\'' {
                    quote = None;
                }
            }
            _ if c == escape => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c == '"' || c == '\'' => {
                current.push(c);
                quote = Some(c);
            }
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn required(keyword: &str, rest: &str, line_num: usize) -> Result<String> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Err(BuildError::parse(
            line_num,
            format!("{} requires an argument", keyword),
        ));
    }
    Ok(rest.to_string())
}

fn required_words(keyword: &str, rest: &str, line_num: usize, escape: char) -> Result<Vec<String>> {
    let words = split_words(rest, escape);
    if words.is_empty() {
        return Err(BuildError::parse(
            line_num,
            format!("{} requires at least one argument", keyword),
        ));
    }
    Ok(words)
}

fn single_word(keyword: &str, rest: &str, line_num: usize, escape: char) -> Result<String> {
    let mut words = split_words(rest, escape);
    if words.len() != 1 {
        return Err(BuildError::parse(
            line_num,
            format!("{} requires exactly one argument", keyword),
        ));
    }
    Ok(words.remove(0))
}

/// Parse a JSON array string like `["a", "b", "c"]`.
fn parse_json_array(s: &str) -> Option<Vec<String>> {
    let s = s.trim();
    if !s.starts_with('[') {
        return None;
    }
    serde_json::from_str(s).ok()
}

// --- Individual instruction parsers ---

fn parse_from(rest: &str, line_num: usize, escape: char) -> Result<BaseImage> {
    let words = split_words(rest, escape);
    if words.first().is_some_and(|w| w.starts_with("--")) {
        return Err(BuildError::parse(line_num, "FROM flags are not supported"));
    }
    match words.as_slice() {
        [image] => Ok(BaseImage {
            image: image.clone(),
            alias: None,
        }),
        [image, as_kw, alias] if as_kw.eq_ignore_ascii_case("AS") => Ok(BaseImage {
            image: image.clone(),
            alias: Some(alias.clone()),
        }),
        [] => Err(BuildError::parse(
            line_num,
            "FROM requires an image argument",
        )),
        _ => Err(BuildError::parse(
            line_num,
            "FROM expects '<image> [AS <name>]'",
        )),
    }
}

fn parse_arg(rest: &str, line_num: usize, escape: char) -> Result<Instruction> {
    let word = single_word("ARG", rest, line_num, escape)?;
    let (name, default) = match word.split_once('=') {
        Some((name, default)) => (name.to_string(), Some(default.to_string())),
        None => (word, None),
    };
    if name.is_empty() {
        return Err(BuildError::parse(line_num, "ARG names can not be blank"));
    }
    Ok(Instruction::Arg(ArgCommand::new(name, default)))
}

/// Parse `key=value ...` pairs, or the legacy `key value` form.
fn parse_pairs(
    keyword: &str,
    rest: &str,
    line_num: usize,
    escape: char,
) -> Result<Vec<(String, String)>> {
    let words = required_words(keyword, rest, line_num, escape)?;

    if !words[0].contains('=') {
        // Legacy form: the value is the rest of the line.
        let (key, value) = split_first_word(rest);
        if value.is_empty() {
            return Err(BuildError::parse(
                line_num,
                format!("{} {} requires a value", keyword, key),
            ));
        }
        return Ok(vec![(key.to_string(), value.to_string())]);
    }

    words
        .into_iter()
        .map(|word| match word.split_once('=') {
            Some(("", _)) => Err(BuildError::parse(
                line_num,
                format!("{} names can not be blank", keyword),
            )),
            Some((key, value)) => Ok((key.to_string(), value.to_string())),
            None => Err(BuildError::parse(
                line_num,
                format!(
                    "Syntax error - can't find = in \"{}\". Must be of the form: name=value",
                    word
                ),
            )),
        })
        .collect()
}

fn parse_env(rest: &str, line_num: usize, escape: char) -> Result<Instruction> {
    let pairs = parse_pairs("ENV", rest, line_num, escape)?;
    Ok(Instruction::Env(EnvCommand::new(pairs)))
}

fn parse_label(rest: &str, line_num: usize, escape: char) -> Result<Instruction> {
    let pairs = parse_pairs("LABEL", rest, line_num, escape)?;
    Ok(Instruction::Label(LabelCommand { pairs }))
}

fn parse_volume(rest: &str, line_num: usize, escape: char) -> Result<Instruction> {
    let (paths, json) = match parse_json_array(rest) {
        Some(paths) => (paths, true),
        None => (split_words(rest, escape), false),
    };
    if paths.is_empty() {
        return Err(BuildError::parse(line_num, "VOLUME requires at least one path"));
    }
    Ok(Instruction::Volume(VolumeCommand { paths, json }))
}

fn parse_shell(rest: &str, line_num: usize) -> Result<Instruction> {
    let shell = parse_json_array(rest).ok_or_else(|| {
        BuildError::parse(
            line_num,
            "SHELL requires the arguments to be in JSON form",
        )
    })?;
    if shell.is_empty() {
        return Err(BuildError::parse(line_num, "SHELL requires at least one argument"));
    }
    Ok(Instruction::Shell(ShellCommand { shell }))
}

/// Exec form when the text is a valid JSON string array, shell form
/// otherwise.
fn parse_command_form(keyword: &str, rest: &str, line_num: usize) -> Result<CommandForm> {
    let rest = required(keyword, rest, line_num)?;
    Ok(match parse_json_array(&rest) {
        Some(argv) => CommandForm::Exec(argv),
        None => CommandForm::Shell(rest),
    })
}

fn parse_copy(rest: &str, line_num: usize, escape: char) -> Result<Instruction> {
    let (flags, remaining): (Vec<&str>, &str) = {
        let mut flags = Vec::new();
        let mut remaining = rest.trim();
        while remaining.starts_with("--") {
            let (flag, after) = split_first_word(remaining);
            flags.push(flag);
            remaining = after;
        }
        (flags, remaining)
    };
    if let Some(flag) = flags.first() {
        let message = if flag.starts_with("--from=") {
            "COPY --from needs multi-stage builds, which are not supported".to_string()
        } else {
            format!("unsupported COPY flag '{}'", flag)
        };
        return Err(BuildError::parse(line_num, message));
    }

    let mut parts = parse_json_array(remaining).unwrap_or_else(|| split_words(remaining, escape));
    if parts.len() < 2 {
        return Err(BuildError::parse(
            line_num,
            "COPY requires at least one source and a destination",
        ));
    }
    let dest = parts.pop().unwrap_or_default();
    Ok(Instruction::Copy(CopyCommand::new(parts, dest)))
}
