//! System prompt assembly.
//!
//! The configured prompt comes first, followed by usage notes for the
//! features the program has switched on.

use procloom_config::ProgramConfig;

/// Name a built-in tool is exposed under in `program`, if it is exposed at all.
///
/// An alias replaces the built-in name.
pub fn exposed_name<'a>(program: &'a ProgramConfig, tool: &'a str) -> Option<&'a str> {
    if let Some((alias, _)) = program.aliases.iter().find(|(_, target)| target.as_str() == tool) {
        return Some(alias.as_str());
    }
    program.tools.iter().any(|t| t == tool).then_some(tool)
}

/// Build the full system prompt for a program.
///
/// `linked` holds `(name, description)` for every program `spawn` may reach.
pub fn system_prompt(program: &ProgramConfig, linked: &[(String, String)]) -> String {
    let mut prompt = program.system_prompt.trim_end().to_string();

    if program.fd.enabled {
        let read = exposed_name(program, procloom_tools::read_fd::NAME).unwrap_or(procloom_tools::read_fd::NAME);
        push_section(
            &mut prompt,
            &format!(
                "## Stored content\n\
                 Tool output longer than {limit} characters is not shown in full. It is stored \
                 and replaced by a short preview inside <fd_result fd=\"handle:N\">…</fd_result>. \
                 Call {read} with that fd to read it page by page (page 1 first), or with \
                 mode=\"line\" and start/count for a specific range. Pass extract_to_new_fd=true \
                 to save a range under a new handle instead of reading it.",
                limit = program.fd.max_direct_output_chars,
            ),
        );
    }

    if program.fd.enabled && program.fd.enable_references {
        push_section(
            &mut prompt,
            "## References\n\
             Wrap content you may want to reuse in <ref id=\"label\">…</ref>. It is stored as \
             ref:label and can be passed anywhere a handle is accepted. Labels use letters, \
             digits, '_', '-' and '.'; reusing a label points it at the newer content.",
        );
    }

    if let Some(spawn) = exposed_name(program, procloom_tools::spawn::NAME)
        && !linked.is_empty()
    {
        let mut section = format!(
            "## Linked programs\n\
             Use {spawn} to delegate a query to one of these programs. Share stored content \
             with it through additional_preload_fds.\n"
        );
        for (name, description) in linked {
            if description.is_empty() {
                section.push_str(&format!("- {name}\n"));
            } else {
                section.push_str(&format!("- {name}: {description}\n"));
            }
        }
        push_section(&mut prompt, section.trim_end());
    }

    prompt
}

fn push_section(prompt: &mut String, section: &str) {
    if !prompt.is_empty() {
        prompt.push_str("\n\n");
    }
    prompt.push_str(section);
}
