//! Borries marker wire protocol.
//!
//! Fragments are plain text commands separated by `;`. Before transmission
//! fragments are buffered and cut into datagrams at every `;;` sentinel;
//! each datagram goes on the wire as `;<datagram>;`. The device answers with
//! `\r`-terminated lines whose first token names the answer class.
//!
//! The fragments below are byte-exact copies of what the device firmware
//! expects, including the XON (`\x11`), ETX (`\x03`) and CAN (`\x18`)
//! control characters. Coordinates always carry exactly two decimals.

/// Separates datagrams inside the outbound buffer.
pub const FRAME_SENTINEL: &str = ";;";

/// Terminates one answer in the inbound stream.
pub const ANSWER_DELIMITER: char = '\r';

/// Keeps the device from timing out while nothing else is queued.
pub const HEARTBEAT: &str = ";*SH;;*SH;";

/// Homes both axes.
pub const HOME: &str = ";*INITrd+,+;*RX;*RY;*RTHOME\x03;*SH;;*SE;;*OA;;*SH;;*SE;";

/// Lowers and raises the marking needle once.
pub const NEEDLE_DOWN: &str = "SP1;;PD;*WT250;PU;*SE;";

/// Halts the device. Written directly, never buffered.
pub const EMERGENCY_OFF: &str = "\x18;;*HE;;\x11;";

/// Motion answers owed by the device once the init sequence completes.
pub const INIT_ACKS: u64 = 12;

/// Motion answers owed per home sequence.
pub const HOME_ACKS: u64 = 2;

/// Motion answers owed per relative move.
pub const MOVE_ACKS: u64 = 1;

/// Motion answers owed per needle actuation.
pub const NEEDLE_ACKS: u64 = 1;

const INIT_HEAD: &str = concat!(
    "\x11*SQ;;\x11*SQ;;\x11*SQ;\x11*CB;*INITstn;*INITzn;*DB;*CPa;*SE;*CPz;*CPd;*CPa;*SE;",
    "*INITp301;*OI;;*CPa;*RTEOF\x03;*SE;*INITwn;*INITgn;*INITppn,pj;*INITzpj;*INITzn;",
    "*INITd16,0,5,500,20000;*INITdx15,0,30;*WD10;*WU10;*SE;*INITs100.00,100.00;",
    "*INITo-100,-100;;*INITno0,0;*INITrd+,+;*INITrr+,+;*INITrs+,+;LO1;*LBn;*INITesn,n;",
    "*INITze-,-;*VM6500,6500;",
);

const INIT_TAIL: &str = concat!(
    "*VH600,600;*VP600,600;*VC600,600;*SE;;*AC90000,90000;*LBd0.00;*LBm1.4,1.16;;*INITn1;;",
    "*INITxqrap;;*INITxp5;*INITzs0;;*INITaen,asn,adj;*MO18E1,9600;*CPa;*SE;;",
    "*INITbeL,0,beL,1,beL,2,beH,3,beL,4,beH,5,beH,6,beL,7,beL,8,beL,9,beL,10,beL,11,beL,12,",
    "beL,13,beL,14,beL,15,beL,16,beL,17,beL,18,beL,19,beL,20,beL,21,beL,22,beL,23,beL,24;",
    "*INITbaD,22,baD,21,baD,20,baD,19,baD,18,baD,17,baD,16,baD,15,baD,14,baD,13,baD,12,",
    "baD,11,baD,10,baD,9,baD,8,baD,7,baD,6,baD,5,baD,4,baD,3,baD,2,baD,1,ba0,0;*SE;;;;",
    "*VP1200,1200;;*CPa;*RTEOF\x03;*SE;CS6;*INITbe0,5;;*CPa;*RTEOF\x03;*SE;;*XRH;;*EB;*SE;;",
    "*SH;;*SH;;*SH;;*SH;;PU;;*INITrr+,+;",
);

/// Speed and power parameters of the init sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitProfile {
    /// X axis speed.
    pub speed_x: u32,
    /// Y axis speed.
    pub speed_y: u32,
    /// Needle power (voltage) setting.
    pub power: u32,
}

impl InitProfile {
    /// Production speed.
    pub const NORMAL: Self = Self {
        speed_x: 6500,
        speed_y: 6500,
        power: 2200,
    };

    /// Tenth of production speed, for setup and testing.
    pub const SLOW_MOTION: Self = Self {
        speed_x: 650,
        speed_y: 650,
        power: 220,
    };

    /// Profile selected by the `slow_motion` device setting.
    pub const fn select(slow_motion: bool) -> Self {
        if slow_motion {
            Self::SLOW_MOTION
        } else {
            Self::NORMAL
        }
    }
}

/// Init sequence for the given profile.
pub fn init(profile: &InitProfile) -> String {
    format!(
        "{INIT_HEAD}*VN{},{};*VS400,400;*SE;*VB{};{INIT_TAIL}",
        profile.speed_x, profile.speed_y, profile.power
    )
}

/// Relative move by `(dx, dy)` millimetres.
///
/// Callers round the deltas first; the formatting here only pins the
/// number of decimals.
pub fn move_relative(dx: f64, dy: f64) -> String {
    format!(";*PR{dx:.2},{dy:.2};;*SH;*OA;*SE;")
}

/// Wrap a datagram taken from the outbound buffer for transmission.
pub fn wrap_frame(datagram: &str) -> String {
    format!(";{datagram};")
}

/// Remove the first complete datagram from `buf`.
///
/// Returns `None` while `buf` holds no sentinel.
pub fn take_frame(buf: &mut String) -> Option<String> {
    let idx = buf.find(FRAME_SENTINEL)?;
    let datagram = buf[..idx].to_string();
    buf.drain(..idx + FRAME_SENTINEL.len());
    Some(datagram)
}

/// Remove the first complete answer from `buf`, without its delimiter.
pub fn take_answer(buf: &mut String) -> Option<String> {
    let idx = buf.find(ANSWER_DELIMITER)?;
    let answer = buf[..idx].to_string();
    buf.drain(..idx + ANSWER_DELIMITER.len_utf8());
    Some(answer)
}

/// Leading token of an answer, `None` for blank answers.
pub fn answer_prefix(answer: &str) -> Option<&str> {
    answer.split_whitespace().next()
}
