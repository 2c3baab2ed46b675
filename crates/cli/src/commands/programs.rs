//! `procloom programs`: list configured programs.

use procloom_config::RuntimeConfig;
use procloom_engine::ProcessFactory;
use std::path::Path;

pub fn run(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = RuntimeConfig::load_at(config_path)?;
    let factory = ProcessFactory::from_config(config)?;
    print!("{}", describe(&factory));
    Ok(())
}

fn describe(factory: &ProcessFactory) -> String {
    let config = factory.config();
    let mut out = String::new();

    for name in factory.programs() {
        let Some(program) = config.program(name) else {
            continue;
        };
        let marker = if name == config.default_program { " (default)" } else { "" };
        out.push_str(&format!("{name}{marker}\n"));
        if !program.description.is_empty() {
            out.push_str(&format!("  {}\n", program.description));
        }
        out.push_str(&format!("  backend: {} / {}\n", program.backend, program.model));

        let tools = factory.tools(name).map(|t| t.names().join(", ")).unwrap_or_default();
        if tools.is_empty() {
            out.push_str("  tools:   none\n");
        } else {
            out.push_str(&format!("  tools:   {tools}\n"));
        }
        if !program.linked_programs.is_empty() {
            out.push_str(&format!("  linked:  {}\n", program.linked_programs.join(", ")));
        }
        if program.fd.enabled {
            out.push_str(&format!(
                "  fd:      store output over {} chars, {} chars per page\n",
                program.fd.max_direct_output_chars, program.fd.page_size
            ));
        }
        out.push('\n');
    }
    out
}
