//! Emits an IDC script that walks the jump table and marks every exported
//! function for the disassembler.

use crate::{error::Result, executable::Executable};
use std::{fs::File, io::Write, path::Path};

pub fn write_jump_mark_table_script(
    exe: &Executable,
    base_filename: impl AsRef<Path>,
) -> Result<()> {
    let mut path = base_filename.as_ref().as_os_str().to_os_string();
    path.push("_jt.idc");
    let mut out = File::create(path)?;

    let code0 = exe.code0();
    write!(
        out,
        "#include <idc.idc>\n\
         \n\
         static main() {{\n\
         \tauto num = {num};\n\
         \tauto offset = 0x{offset:08X};\n\
         \tauto a5offset = 0x{a5offset:08X};\n\
         \t\n\
         \tauto i;\n\
         \tfor (i = 0; i < num; ++i) {{\n\
         \t\t// Calculate the jumptable entry offset\n\
         \t\tauto entryOff = offset + i * 8;\n\
         \n\
         \t\t// Mark offset entry as dword\n\
         \t\tMakeDword(entryOff + 4);\n\
         \t\t// Read the function offset\n\
         \t\tauto funcOff = Dword(entryOff + 4);\n\
         \n\
         \t\t// Mark the function as code\n\
         \t\tAutoMark(funcOff, AU_CODE);\n\
         \t\t// Finally mark the function as procedure. Doing this after marking it\n\
         \t\t// as code, should allow IDA to mark more functions successfully.\n\
         \t\tAutoMark(funcOff, AU_PROC);\n\
         \t}}\n\
         }}\n",
        num = code0.jump_table_entry_count(),
        offset = code0.jump_table_image_offset(),
        a5offset = code0.application_globals_size(),
    )?;

    out.flush()?;
    Ok(())
}
