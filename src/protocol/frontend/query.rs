//! Simple and extended query messages.

use crate::params::ParameterList;
use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::FormatCode;

/// Write a Query. The text may hold several `;`-separated statements.
pub fn write_query(buf: &mut Vec<u8>, query: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::QUERY);
    msg.write_cstr(query);
    msg.finish();
}

/// Write a Parse for the unnamed statement, declaring one oid per parameter.
pub fn write_parse(buf: &mut Vec<u8>, query: &str, params: &ParameterList) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr("");
    msg.write_cstr(query);
    msg.write_i16(params.len() as i16);
    for param in params.iter() {
        msg.write_u32(param.oid);
    }
    msg.finish();
}

/// Write a Bind of the unnamed statement into the unnamed portal.
///
/// NULL parameters are sent with length -1. `result_formats` holds one code
/// per result column, or is empty for all-text.
pub fn write_bind(buf: &mut Vec<u8>, params: &ParameterList, result_formats: &[FormatCode]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);
    msg.write_cstr("");
    msg.write_cstr("");

    msg.write_i16(params.len() as i16);
    for param in params.iter() {
        msg.write_i16(param.format.as_wire());
    }

    msg.write_i16(params.len() as i16);
    for param in params.iter() {
        match &param.payload {
            None => msg.write_i32(-1),
            Some(bytes) => {
                msg.write_i32(bytes.len() as i32);
                msg.write_bytes(bytes);
            }
        }
    }

    msg.write_i16(result_formats.len() as i16);
    for format in result_formats {
        msg.write_i16(format.as_wire());
    }
    msg.finish();
}

/// Write a Describe of the unnamed statement.
pub fn write_describe_statement(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(b'S');
    msg.write_cstr("");
    msg.finish();
}

/// Write a Describe of the unnamed portal.
pub fn write_describe_portal(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(b'P');
    msg.write_cstr("");
    msg.finish();
}

/// Write an Execute of the unnamed portal with no row limit.
pub fn write_execute(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr("");
    msg.write_i32(0);
    msg.finish();
}

/// Write a Sync, closing the extended-query sequence.
pub fn write_sync(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::SYNC).finish();
}
