//! Second verification pass through the LLVM C API

use llvm_sys::analysis::*;
use llvm_sys::core::*;
use llvm_sys::ir_reader::LLVMParseIRInContext;
use llvm_sys::prelude::*;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::utils::{Error, Result};

/// Parse printed assembly back into LLVM and run its verifier
pub fn verify_text(text: &str) -> Result<()> {
    let buffer_name = CString::new("spezi").map_err(|e| Error::CodeGen(e.to_string()))?;

    unsafe {
        let context = LLVMContextCreate();
        // the parser takes ownership of the buffer
        let buffer = LLVMCreateMemoryBufferWithMemoryRangeCopy(
            text.as_ptr() as *const c_char,
            text.len(),
            buffer_name.as_ptr(),
        );

        let mut module: LLVMModuleRef = ptr::null_mut();
        let mut error_msg: *mut c_char = ptr::null_mut();
        if LLVMParseIRInContext(context, buffer, &mut module, &mut error_msg) != 0 {
            let msg = take_message(error_msg, "LLVM could not parse the emitted module");
            LLVMContextDispose(context);
            return Err(Error::Verification(msg));
        }

        let mut error_msg: *mut c_char = ptr::null_mut();
        let failed = LLVMVerifyModule(
            module,
            LLVMVerifierFailureAction::LLVMReturnStatusAction,
            &mut error_msg,
        );
        let result = if failed != 0 {
            Err(Error::Verification(take_message(
                error_msg,
                "Unknown verification error",
            )))
        } else {
            if !error_msg.is_null() {
                LLVMDisposeMessage(error_msg);
            }
            Ok(())
        };

        LLVMDisposeModule(module);
        LLVMContextDispose(context);
        result
    }
}

/// Copy out and free an LLVM-owned message
unsafe fn take_message(error_msg: *mut c_char, fallback: &str) -> String {
    if error_msg.is_null() {
        return fallback.to_string();
    }
    let msg = CStr::from_ptr(error_msg).to_string_lossy().to_string();
    LLVMDisposeMessage(error_msg);
    msg
}
