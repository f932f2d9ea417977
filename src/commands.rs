/// Shell commands, autocomplete and line parsing

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "list",
    aliases: &["ls", "l"],
    usage: "list",
    description: "Show your tasks",
  },
  Command {
    name: "add",
    aliases: &["a", "new"],
    usage: "add <text>",
    description: "Add a task",
  },
  Command {
    name: "edit",
    aliases: &["e"],
    usage: "edit <n> <text>",
    description: "Change a task's description",
  },
  Command {
    name: "toggle",
    aliases: &["t", "done", "x"],
    usage: "toggle <n>",
    description: "Flip a task between open and done",
  },
  Command {
    name: "rm",
    aliases: &["remove", "delete", "del"],
    usage: "rm <n>",
    description: "Delete a task",
  },
  Command {
    name: "partner",
    aliases: &["p", "theirs"],
    usage: "partner",
    description: "Show your partner's tasks",
  },
  Command {
    name: "refresh",
    aliases: &["r", "reload"],
    usage: "refresh",
    description: "Refetch everything now",
  },
  Command {
    name: "whoami",
    aliases: &["me"],
    usage: "whoami",
    description: "Show the signed-in account",
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    usage: "help",
    description: "List commands",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    usage: "quit",
    description: "Exit duet",
  },
];

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    if cmd.name == input_lower {
      matches.push((cmd, 0));
      continue;
    }

    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
    }
  }

  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// Resolve a typed word to one command. Ambiguous prefixes resolve only when
/// an exact name or alias matches.
pub fn resolve(word: &str) -> Result<&'static Command, String> {
  let word_lower = word.to_lowercase();
  let suggestions = get_suggestions(&word_lower);
  let exact = suggestions
    .first()
    .filter(|cmd| cmd.name == word_lower || cmd.aliases.contains(&word_lower.as_str()));

  match (exact, suggestions.as_slice()) {
    (Some(cmd), _) => Ok(*cmd),
    (None, [only]) => Ok(*only),
    (None, []) => Err(format!("unknown command '{}', try 'help'", word)),
    (None, many) => Err(format!(
      "'{}' is ambiguous: {}",
      word,
      many.iter().map(|c| c.name).collect::<Vec<_>>().join(", ")
    )),
  }
}

/// A parsed shell line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
  List,
  Add(String),
  Edit(usize, String),
  Toggle(usize),
  Remove(usize),
  Partner,
  Refresh,
  WhoAmI,
  Help,
  Quit,
}

/// Parse one line. Blank lines parse to `None`.
pub fn parse(line: &str) -> Result<Option<ShellCommand>, String> {
  let line = line.trim();
  if line.is_empty() {
    return Ok(None);
  }

  let (word, rest) = match line.split_once(char::is_whitespace) {
    Some((word, rest)) => (word, rest.trim()),
    None => (line, ""),
  };
  let cmd = resolve(word)?;

  let parsed = match cmd.name {
    "list" => ShellCommand::List,
    "add" => ShellCommand::Add(rest.to_string()),
    "edit" => {
      let (n, text) = match rest.split_once(char::is_whitespace) {
        Some((n, text)) => (n, text.trim()),
        None => (rest, ""),
      };
      ShellCommand::Edit(item_number(n, cmd)?, text.to_string())
    }
    "toggle" => ShellCommand::Toggle(item_number(rest, cmd)?),
    "rm" => ShellCommand::Remove(item_number(rest, cmd)?),
    "partner" => ShellCommand::Partner,
    "refresh" => ShellCommand::Refresh,
    "whoami" => ShellCommand::WhoAmI,
    "help" => ShellCommand::Help,
    _ => ShellCommand::Quit,
  };
  Ok(Some(parsed))
}

fn item_number(word: &str, cmd: &Command) -> Result<usize, String> {
  match word.parse::<usize>() {
    Ok(n) if n > 0 => Ok(n),
    _ => Err(format!("usage: {}", cmd.usage)),
  }
}

/// Help text for the shell
pub fn help() -> String {
  COMMANDS
    .iter()
    .map(|c| format!("  {:<18} {}", c.usage, c.description))
    .collect::<Vec<_>>()
    .join("\n")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_input_returns_all() {
    let suggestions = get_suggestions("");
    assert_eq!(suggestions.len(), COMMANDS.len());
  }

  #[test]
  fn test_exact_match() {
    let suggestions = get_suggestions("toggle");
    assert_eq!(suggestions[0].name, "toggle");
  }

  #[test]
  fn test_alias_match() {
    let suggestions = get_suggestions("done");
    assert_eq!(suggestions[0].name, "toggle");
  }

  #[test]
  fn test_prefix_match() {
    let suggestions = get_suggestions("par");
    assert_eq!(suggestions[0].name, "partner");
  }

  #[test]
  fn test_alias_beats_prefix() {
    // "r" is refresh's alias and also a prefix of "rm"
    assert_eq!(resolve("r").unwrap().name, "refresh");
  }

  #[test]
  fn test_ambiguous_prefix() {
    let err = resolve("re").unwrap_err();
    assert!(err.contains("ambiguous"));
    assert!(err.contains("refresh"));
    assert!(err.contains("remove") || err.contains("rm"));
  }

  #[test]
  fn test_unknown_command() {
    assert!(resolve("frobnicate").unwrap_err().contains("unknown command"));
  }

  #[test]
  fn test_parse_lines() {
    assert_eq!(parse("   ").unwrap(), None);
    assert_eq!(parse("ls").unwrap(), Some(ShellCommand::List));
    assert_eq!(
      parse("add  Buy milk ").unwrap(),
      Some(ShellCommand::Add("Buy milk".to_string()))
    );
    assert_eq!(
      parse("edit 2 Buy oat milk").unwrap(),
      Some(ShellCommand::Edit(2, "Buy oat milk".to_string()))
    );
    assert_eq!(parse("x 3").unwrap(), Some(ShellCommand::Toggle(3)));
    assert_eq!(parse("rm 1").unwrap(), Some(ShellCommand::Remove(1)));
    assert_eq!(parse("q").unwrap(), Some(ShellCommand::Quit));
  }

  #[test]
  fn test_item_numbers_are_one_based() {
    assert_eq!(parse("rm 0").unwrap_err(), "usage: rm <n>");
    assert_eq!(parse("toggle").unwrap_err(), "usage: toggle <n>");
    assert_eq!(parse("edit two words").unwrap_err(), "usage: edit <n> <text>");
  }

  #[test]
  fn test_add_keeps_empty_text_for_validation() {
    // Empty descriptions are rejected by the write path, not the parser
    assert_eq!(parse("add").unwrap(), Some(ShellCommand::Add(String::new())));
  }
}
