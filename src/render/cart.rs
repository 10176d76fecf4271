// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Wrapper cart around user source.
//!
//! The wrapper hooks `flip()` so that recording starts on the second frame
//! (the emulator cannot record during frame 0) and the video is saved after
//! eight seconds. Carts that never loop fall through to `finish()`, which
//! records a short clip of whatever is on screen. Either path prints the
//! sentinel once the video is written.

/// Seconds of animation captured from looping carts.
pub const CAPTURE_SECONDS: u32 = 8;

/// Line printed by the wrapper once the recording has been saved.
pub fn sentinel(correlation_id: &str) -> String {
    format!("{} done", correlation_id)
}

/// Cart file name for a run; the emulator names the recording after it.
pub fn cart_file_name(correlation_id: &str) -> String {
    format!("{}.p8", correlation_id)
}

/// Recording written by the emulator for a run.
pub fn artifact_file_name(correlation_id: &str) -> String {
    format!("{}_0.gif", correlation_id)
}

/// Lua identifier unique to this run.
fn state_var(correlation_id: &str) -> String {
    let suffix: String = correlation_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("__state_{}__", suffix)
}

/// Build the full `.p8` file for `source`.
pub fn wrap(source: &str, correlation_id: &str) -> String {
    let state = state_var(correlation_id);
    let done = sentinel(correlation_id);

    format!(
        r#"pico-8 cartridge // http://www.pico-8.com
version 18
__lua__
load=nil save=nil
{state}={{flip=flip, t=t, extcmd=extcmd, printh=printh, start=t(), did_start_rec=false, count=0}}
function flip()
    local state = {state}
    if state.t()-state.start >= {seconds} then
        state.extcmd('video')
        state.printh('{done}')
    end
    state.count+=1
    if state.count == 2 then
        state.extcmd('rec')
        state.did_start_rec = true
    end
    state.flip()
end
{source}
function finish()
 local state = {state}
 local start = state.t()
 if not state.did_start_rec then
     while state.t() - start < .5 do
     end
     state.extcmd('rec')
 end
 while state.t() - start < 2 do
 end
 state.extcmd('video')
 state.printh('{done}')
end
finish()"#,
        state = state,
        seconds = CAPTURE_SECONDS,
        done = done,
        source = source,
    )
}
