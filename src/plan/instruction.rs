//! Dockerfile instructions
//!
//! Only the handful of instructions the builder emits are modelled. `Display`
//! produces Dockerfile syntax and `parse` reads it back.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InstructionError {
    #[error("Unsupported instruction '{0}'")]
    Unsupported(String),

    #[error("Malformed {keyword} instruction: {line}")]
    Malformed { keyword: String, line: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Instruction {
    From { image: String },
    Env { vars: Vec<(String, String)> },
    Copy { src: String, dest: String },
    Run { command: String },
    Workdir { path: String },
    User { name: String },
}

impl Instruction {
    pub fn keyword(&self) -> &'static str {
        match self {
            Instruction::From { .. } => "FROM",
            Instruction::Env { .. } => "ENV",
            Instruction::Copy { .. } => "COPY",
            Instruction::Run { .. } => "RUN",
            Instruction::Workdir { .. } => "WORKDIR",
            Instruction::User { .. } => "USER",
        }
    }

    pub fn parse(line: &str) -> Result<Self, InstructionError> {
        let line = line.trim();
        let (keyword, rest) = line
            .split_once(char::is_whitespace)
            .map(|(k, r)| (k, r.trim()))
            .unwrap_or((line, ""));
        let keyword_upper = keyword.to_ascii_uppercase();
        let malformed = || InstructionError::Malformed {
            keyword: keyword_upper.clone(),
            line: line.to_string(),
        };
        if rest.is_empty() {
            return Err(malformed());
        }

        match keyword_upper.as_str() {
            "FROM" => Ok(Instruction::From {
                image: rest.to_string(),
            }),
            "RUN" => Ok(Instruction::Run {
                command: rest.to_string(),
            }),
            "WORKDIR" => Ok(Instruction::Workdir {
                path: rest.to_string(),
            }),
            "USER" => Ok(Instruction::User {
                name: rest.to_string(),
            }),
            "COPY" => {
                let parts: Vec<String> = if rest.starts_with('[') {
                    serde_json::from_str(rest).map_err(|_| malformed())?
                } else {
                    rest.split_whitespace().map(str::to_string).collect()
                };
                match parts.as_slice() {
                    [src, dest] => Ok(Instruction::Copy {
                        src: src.clone(),
                        dest: dest.clone(),
                    }),
                    _ => Err(malformed()),
                }
            }
            "ENV" => parse_env(rest)
                .map(|vars| Instruction::Env { vars })
                .ok_or_else(malformed),
            _ => Err(InstructionError::Unsupported(keyword.to_string())),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::From { image } => write!(f, "FROM {}", image),
            Instruction::Env { vars } => {
                write!(f, "ENV")?;
                for (key, value) in vars {
                    write!(f, " {}=\"{}\"", key, escape(value))?;
                }
                Ok(())
            }
            Instruction::Copy { src, dest } => {
                if src.contains(char::is_whitespace) || dest.contains(char::is_whitespace) {
                    let json = serde_json::to_string(&[src, dest]).map_err(|_| fmt::Error)?;
                    write!(f, "COPY {}", json)
                } else {
                    write!(f, "COPY {} {}", src, dest)
                }
            }
            Instruction::Run { command } => write!(f, "RUN {}", command),
            Instruction::Workdir { path } => write!(f, "WORKDIR {}", path),
            Instruction::User { name } => write!(f, "USER {}", name),
        }
    }
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$")
}

/// Parses `K="v" K2=v2` pairs; returns `None` on any malformed pair
fn parse_env(rest: &str) -> Option<Vec<(String, String)>> {
    let mut vars = Vec::new();
    let mut chars = rest.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() || chars.next() != Some('=') {
            return None;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.push(chars.next()?),
                    '"' => {
                        closed = true;
                        break;
                    }
                    other => value.push(other),
                }
            }
            if !closed {
                return None;
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        vars.push((key, value));
    }

    if vars.is_empty() {
        None
    } else {
        Some(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            Instruction::Copy {
                src: "requirements.txt".into(),
                dest: "/requirements.txt".into()
            }
            .to_string(),
            "COPY requirements.txt /requirements.txt"
        );
        assert_eq!(
            Instruction::Env {
                vars: vec![("PYTHONUNBUFFERED".into(), "1".into())]
            }
            .to_string(),
            "ENV PYTHONUNBUFFERED=\"1\""
        );
    }

    #[test]
    fn test_env_escaping_survives_parse() {
        let env = Instruction::Env {
            vars: vec![
                ("GREETING".into(), "say \"hi\" $HOME".into()),
                ("EMPTY".into(), String::new()),
            ],
        };
        assert_eq!(Instruction::parse(&env.to_string()).unwrap(), env);
    }

    #[test]
    fn test_copy_with_spaces_uses_json_form() {
        let copy = Instruction::Copy {
            src: "my app/".into(),
            dest: "/app/".into(),
        };
        let text = copy.to_string();
        assert_eq!(text, r#"COPY ["my app/","/app/"]"#);
        assert_eq!(Instruction::parse(&text).unwrap(), copy);
    }

    #[test]
    fn test_parse_simple_forms() {
        assert_eq!(
            Instruction::parse("RUN pip install --no-cache-dir -r /requirements.txt").unwrap(),
            Instruction::Run {
                command: "pip install --no-cache-dir -r /requirements.txt".into()
            }
        );
        assert_eq!(
            Instruction::parse("user app").unwrap(),
            Instruction::User { name: "app".into() }
        );
        assert_eq!(
            Instruction::parse("ENV A=1 B=two").unwrap(),
            Instruction::Env {
                vars: vec![("A".into(), "1".into()), ("B".into(), "two".into())]
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Instruction::parse("EXPOSE 80"),
            Err(InstructionError::Unsupported("EXPOSE".into()))
        );
        assert!(matches!(
            Instruction::parse("COPY onlyone"),
            Err(InstructionError::Malformed { .. })
        ));
        assert!(Instruction::parse("ENV BROKEN").is_err());
        assert!(Instruction::parse("ENV A=\"open").is_err());
        assert!(Instruction::parse("WORKDIR").is_err());
    }
}
