//! Save-format migration chain. Steps are ordered `from -> from+1`; the
//! chain is mandatory and fails closed when a step is missing. Current
//! steps are structural no-ops that exist to carry the named audit trail
//! of format bumps.

pub type MigrationFn = fn(&mut Vec<u8>) -> Result<(), String>;

#[derive(Clone, Copy)]
pub struct Migration {
    pub from: u32,
    pub to: u32,
    pub name: &'static str,
    pub apply: MigrationFn,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("name", &self.name)
            .finish()
    }
}

fn no_op(_payload: &mut Vec<u8>) -> Result<(), String> {
    Ok(())
}

pub fn core_migrations() -> Vec<Migration> {
    vec![
        Migration { from: 2, to: 3, name: "v2_to_v3_tlv_header", apply: no_op },
        Migration { from: 3, to: 4, name: "v3_to_v4_varint_counts", apply: no_op },
        Migration { from: 4, to: 5, name: "v4_to_v5_string_intern", apply: no_op },
        Migration { from: 5, to: 6, name: "v5_to_v6_section_compress", apply: no_op },
        Migration { from: 6, to: 7, name: "v6_to_v7_integrity", apply: no_op },
        Migration { from: 7, to: 8, name: "v7_to_v8_replay_hash", apply: no_op },
        Migration { from: 8, to: 9, name: "v8_to_v9_signature_opt", apply: no_op },
    ]
}
