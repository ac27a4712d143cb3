use std::io::{self, Write};

pub fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        if io::stdin().read_line(&mut input)? == 0 {
            // stdin closed; nobody can answer
            return Ok(default.unwrap_or(false));
        }

        if let Some(answer) = parse_answer(&input, default) {
            return Ok(answer);
        }
    }
}

fn parse_answer(input: &str, default: Option<bool>) -> Option<bool> {
    match input.trim().to_uppercase().as_str() {
        "Y" | "YES" => Some(true),
        "N" | "NO" => Some(false),
        "" => default,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("y\n", Some(false)), Some(true));
        assert_eq!(parse_answer(" No ", None), Some(false));
        assert_eq!(parse_answer("\n", Some(false)), Some(false));
        assert_eq!(parse_answer("\n", None), None);
        assert_eq!(parse_answer("maybe", Some(true)), None);
    }
}
