/// Options for source evaluation, shared by the embedding entrypoints and
/// the CLI.
#[derive(Clone, Debug)]
pub struct EvalOptions {
    /// Namespace compilation runs against.
    pub ns: String,
    /// Disassemble each chunk to stderr before running it.
    pub dump_bytecode: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            ns: "user".to_string(),
            dump_bytecode: false,
        }
    }
}
