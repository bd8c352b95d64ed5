//! Argument parsing
//!
//! `admin-sessionctl [--config PATH] <command> [args]`
//!
//! - `login [--email EMAIL]`
//! - `logout`
//! - `whoami`: verify the stored session against the API
//! - `status`: show what is stored, without touching the network
//! - `get PATH [key=value ...]`

use crate::error::{Error, Result};

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Login { email: Option<String> },
    Logout,
    Whoami,
    Status,
    Get { path: String, query: Vec<(String, String)> },
}

#[derive(Debug, PartialEq, Eq)]
pub struct Cli {
    pub config: Option<String>,
    pub command: Command,
}

impl Cli {
    /// Parse arguments, excluding the program name.
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut config = None;
        let mut email = None;
        let mut positional = Vec::new();

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => config = Some(iter.next().ok_or(Error::MissingValue("--config"))?.clone()),
                "--email" => email = Some(iter.next().ok_or(Error::MissingValue("--email"))?.clone()),
                _ => positional.push(arg.as_str()),
            }
        }

        let (name, rest) = positional.split_first().ok_or(Error::MissingCommand)?;
        let command = match *name {
            "login" => {
                no_extra(rest)?;
                Command::Login { email }
            }
            "logout" => {
                no_extra(rest)?;
                Command::Logout
            }
            "whoami" => {
                no_extra(rest)?;
                Command::Whoami
            }
            "status" => {
                no_extra(rest)?;
                Command::Status
            }
            "get" => {
                let (path, params) = rest.split_first().ok_or(Error::MissingValue("get"))?;
                let query = params
                    .iter()
                    .map(|p| {
                        p.split_once('=')
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .ok_or_else(|| Error::MalformedQuery(p.to_string()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Command::Get {
                    path: path.to_string(),
                    query,
                }
            }
            other => return Err(Error::UnknownCommand(other.to_string())),
        };

        Ok(Self { config, command })
    }
}

fn no_extra(rest: &[&str]) -> Result<()> {
    match rest.first() {
        Some(arg) => Err(Error::UnexpectedArgument(arg.to_string())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        Cli::parse(&args)
    }

    #[test]
    fn login_with_flags_in_any_position() {
        let cli = parse(&["--email", "ops@example.com", "login", "--config", "/etc/a.toml"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some("/etc/a.toml"));
        assert_eq!(
            cli.command,
            Command::Login {
                email: Some("ops@example.com".into())
            }
        );
    }

    #[test]
    fn get_collects_query_pairs() {
        let cli = parse(&["get", "/users", "page=2", "role=staff"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Get {
                path: "/users".into(),
                query: vec![
                    ("page".into(), "2".into()),
                    ("role".into(), "staff".into())
                ],
            }
        );
    }

    #[test]
    fn malformed_query_is_rejected() {
        assert_eq!(
            parse(&["get", "/users", "page"]).unwrap_err(),
            Error::MalformedQuery("page".into())
        );
    }

    #[test]
    fn usage_errors() {
        assert_eq!(parse(&[]).unwrap_err(), Error::MissingCommand);
        assert_eq!(
            parse(&["frobnicate"]).unwrap_err(),
            Error::UnknownCommand("frobnicate".into())
        );
        assert_eq!(
            parse(&["status", "--config"]).unwrap_err(),
            Error::MissingValue("--config")
        );
        assert_eq!(
            parse(&["logout", "now"]).unwrap_err(),
            Error::UnexpectedArgument("now".into())
        );
        assert_eq!(parse(&["get"]).unwrap_err(), Error::MissingValue("get"));
    }
}
