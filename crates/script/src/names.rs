//! Name-operation scripts.
//!
//! A name output script has the shape
//! `<op> <operands...> OP_2DROP[/OP_DROP] <destination script>`.  The parser
//! is total: any shape mismatch yields `None`, never a panic, regardless of
//! input.

use nmcd_primitives::hash::hash160;

pub const OP_NAME_NEW: u8 = 0x51;
pub const OP_NAME_FIRSTUPDATE: u8 = 0x52;
pub const OP_NAME_UPDATE: u8 = 0x53;

const OP_0: u8 = 0x00;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_NOP: u8 = 0x61;
const OP_2DROP: u8 = 0x6d;
const OP_DROP: u8 = 0x75;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NameOp {
    NameNew {
        hash: Vec<u8>,
    },
    NameFirstUpdate {
        name: Vec<u8>,
        value: Vec<u8>,
        rand: Vec<u8>,
    },
    NameUpdate {
        name: Vec<u8>,
        value: Vec<u8>,
    },
}

impl NameOp {
    pub fn is_any_update(&self) -> bool {
        matches!(
            self,
            NameOp::NameFirstUpdate { .. } | NameOp::NameUpdate { .. }
        )
    }

    /// The operated-on name; `None` for commitments, which hide it.
    pub fn name(&self) -> Option<&[u8]> {
        match self {
            NameOp::NameNew { .. } => None,
            NameOp::NameFirstUpdate { name, .. } | NameOp::NameUpdate { name, .. } => {
                Some(name.as_slice())
            }
        }
    }

    pub fn value(&self) -> Option<&[u8]> {
        match self {
            NameOp::NameNew { .. } => None,
            NameOp::NameFirstUpdate { value, .. } | NameOp::NameUpdate { value, .. } => {
                Some(value.as_slice())
            }
        }
    }
}

/// A script picked apart into its name operation and destination part.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NameScript {
    pub op: NameOp,
    pub address: Vec<u8>,
}

/// The registration commitment: `hash160(rand || name)`.
pub fn name_commitment(rand: &[u8], name: &[u8]) -> [u8; 20] {
    let mut data = Vec::with_capacity(rand.len() + name.len());
    data.extend_from_slice(rand);
    data.extend_from_slice(name);
    hash160(&data)
}

/// One script operation: the opcode plus its push payload, if any.
fn next_op<'a>(script: &'a [u8], cursor: &mut usize) -> Option<(u8, Option<&'a [u8]>)> {
    let opcode = *script.get(*cursor)?;
    *cursor += 1;

    let len = match opcode {
        OP_0 => return Some((opcode, Some(&[]))),
        1..=0x4b => opcode as usize,
        OP_PUSHDATA1 => {
            let len = *script.get(*cursor)? as usize;
            *cursor += 1;
            len
        }
        OP_PUSHDATA2 => {
            let bytes = script.get(*cursor..*cursor + 2)?;
            *cursor += 2;
            u16::from_le_bytes([bytes[0], bytes[1]]) as usize
        }
        OP_PUSHDATA4 => {
            let bytes = script.get(*cursor..*cursor + 4)?;
            *cursor += 4;
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
        }
        _ => return Some((opcode, None)),
    };

    let data = script.get(*cursor..*cursor + len)?;
    *cursor += len;
    Some((opcode, Some(data)))
}

fn is_drop(opcode: u8) -> bool {
    opcode == OP_DROP || opcode == OP_2DROP || opcode == OP_NOP
}

/// Parse a script pubkey as a name operation.  Returns `None` if the script
/// is anything else.
pub fn parse_name_script(script: &[u8]) -> Option<NameScript> {
    let mut cursor = 0usize;

    let (name_opcode, first_payload) = next_op(script, &mut cursor)?;
    if first_payload.is_some() {
        return None;
    }

    let mut args: Vec<&[u8]> = Vec::new();
    loop {
        let (opcode, payload) = next_op(script, &mut cursor)?;
        if is_drop(opcode) {
            break;
        }
        match payload {
            Some(data) => args.push(data),
            None => return None,
        }
    }

    // Skip over any further drops; the address begins at the first opcode
    // that is not one.
    let mut address_start = cursor;
    loop {
        let mut probe = address_start;
        match next_op(script, &mut probe) {
            Some((opcode, _)) if is_drop(opcode) => address_start = probe,
            _ => break,
        }
    }

    let op = match (name_opcode, args.as_slice()) {
        (OP_NAME_NEW, [hash]) => NameOp::NameNew {
            hash: hash.to_vec(),
        },
        (OP_NAME_FIRSTUPDATE, [name, rand, value]) => NameOp::NameFirstUpdate {
            name: name.to_vec(),
            value: value.to_vec(),
            rand: rand.to_vec(),
        },
        (OP_NAME_UPDATE, [name, value]) => NameOp::NameUpdate {
            name: name.to_vec(),
            value: value.to_vec(),
        },
        _ => return None,
    };

    Some(NameScript {
        op,
        address: script[address_start..].to_vec(),
    })
}

/// The destination part of a script: the tail of a name script, or the
/// whole script when it carries no name operation.
pub fn address_part(script: &[u8]) -> Vec<u8> {
    match parse_name_script(script) {
        Some(parsed) => parsed.address,
        None => script.to_vec(),
    }
}

fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len == 0 {
        script.push(OP_0);
        return;
    }
    if len < OP_PUSHDATA1 as usize {
        script.push(len as u8);
    } else if len <= 0xff {
        script.push(OP_PUSHDATA1);
        script.push(len as u8);
    } else if len <= 0xffff {
        script.push(OP_PUSHDATA2);
        script.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        script.push(OP_PUSHDATA4);
        script.extend_from_slice(&(len as u32).to_le_bytes());
    }
    script.extend_from_slice(data);
}

pub fn build_name_new(address: &[u8], hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(address.len() + 24);
    script.push(OP_NAME_NEW);
    push_data(&mut script, hash);
    script.push(OP_2DROP);
    script.extend_from_slice(address);
    script
}

pub fn build_name_firstupdate(
    address: &[u8],
    name: &[u8],
    value: &[u8],
    rand: &[u8],
) -> Vec<u8> {
    let mut script = Vec::new();
    script.push(OP_NAME_FIRSTUPDATE);
    push_data(&mut script, name);
    push_data(&mut script, rand);
    push_data(&mut script, value);
    script.push(OP_2DROP);
    script.push(OP_2DROP);
    script.extend_from_slice(address);
    script
}

pub fn build_name_update(address: &[u8], name: &[u8], value: &[u8]) -> Vec<u8> {
    let mut script = Vec::new();
    script.push(OP_NAME_UPDATE);
    push_data(&mut script, name);
    push_data(&mut script, value);
    script.push(OP_2DROP);
    script.push(OP_DROP);
    script.extend_from_slice(address);
    script
}
