//! Message Encoder
//!
//! Turns one log message body into its encoded form: the id of its log-type
//! template and the ordered sequence of variable values, interning the
//! template and any dictionary variables along the way.
//!
//! The encoder sits between the classifier (which knows nothing about
//! dictionaries) and the file writer (which knows nothing about message
//! structure): it owns the only code path that mutates the archive's two
//! dictionaries.

use logvault_core::variables::{self, Variable};

use crate::dictionary::DictionaryWriter;

/// One variable as it is written into a file's variable column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodedVariable {
    /// Inline signed integer, ZigZag-varint encoded
    Int(i64),
    /// Inline packed float, varint encoded
    Float(u64),
    /// Variable dictionary id, varint encoded
    DictId(u64),
}

/// Encode `body`: intern its template in the log-type dictionary and its
/// dictionary variables in the variable dictionary, returning the log-type
/// id and the variable values in placeholder order.
pub fn encode_message(
    body: &str,
    logtype_dict: &mut DictionaryWriter,
    var_dict: &mut DictionaryWriter,
) -> (u64, Vec<EncodedVariable>) {
    let parsed = variables::parse_message(body);

    let encoded_variables = parsed
        .variables
        .iter()
        .map(|variable| match variable {
            Variable::Int(value) => EncodedVariable::Int(*value),
            Variable::Float(float) => EncodedVariable::Float(float.as_u64()),
            Variable::Dict(token) => {
                let (id, _) = var_dict.add_entry(token.as_bytes());
                EncodedVariable::DictId(id)
            }
        })
        .collect();

    let (logtype_id, _) = logtype_dict.add_entry(&parsed.template);
    (logtype_id, encoded_variables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_dicts(dir: &TempDir) -> (DictionaryWriter, DictionaryWriter) {
        let logtype_dict = DictionaryWriter::open(
            &dir.path().join("logtype.dict"),
            &dir.path().join("logtype.index"),
        )
        .unwrap();
        let var_dict =
            DictionaryWriter::open(&dir.path().join("var.dict"), &dir.path().join("var.index"))
                .unwrap();
        (logtype_dict, var_dict)
    }

    #[test]
    fn test_identical_templates_share_a_logtype() {
        let dir = TempDir::new().unwrap();
        let (mut logtype_dict, mut var_dict) = open_dicts(&dir);

        let (first, _) =
            encode_message(" connected to host_1 port 80\n", &mut logtype_dict, &mut var_dict);
        let (second, _) =
            encode_message(" connected to host_2 port 443\n", &mut logtype_dict, &mut var_dict);
        assert_eq!(first, second);
        assert_eq!(logtype_dict.len(), 1);
        // host_1 and host_2 intern separately
        assert_eq!(var_dict.len(), 2);
    }

    #[test]
    fn test_variable_order_matches_placeholder_order() {
        let dir = TempDir::new().unwrap();
        let (mut logtype_dict, mut var_dict) = open_dicts(&dir);

        let (_, variables) = encode_message(
            " job job_7 took 1.25 seconds, code 0\n",
            &mut logtype_dict,
            &mut var_dict,
        );
        assert_eq!(variables.len(), 3);
        assert!(matches!(variables[0], EncodedVariable::DictId(0)));
        assert!(matches!(variables[1], EncodedVariable::Float(_)));
        assert!(matches!(variables[2], EncodedVariable::Int(0)));
    }

    #[test]
    fn test_repeated_dict_tokens_share_an_id() {
        let dir = TempDir::new().unwrap();
        let (mut logtype_dict, mut var_dict) = open_dicts(&dir);

        let (_, first) =
            encode_message(" worker worker_3 started\n", &mut logtype_dict, &mut var_dict);
        let (_, second) =
            encode_message(" worker worker_3 stopped\n", &mut logtype_dict, &mut var_dict);
        assert_eq!(first, second);
        assert_eq!(var_dict.len(), 1);
        assert_eq!(logtype_dict.len(), 2);
    }

    #[test]
    fn test_static_only_message_has_no_variables() {
        let dir = TempDir::new().unwrap();
        let (mut logtype_dict, mut var_dict) = open_dicts(&dir);

        let (logtype_id, variables) =
            encode_message(" cache flushed\n", &mut logtype_dict, &mut var_dict);
        assert_eq!(logtype_id, 0);
        assert!(variables.is_empty());
        assert!(var_dict.is_empty());
        assert_eq!(
            logtype_dict.get_entry(0).unwrap().as_ref(),
            b" cache flushed\n"
        );
    }
}
