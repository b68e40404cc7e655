//! Contract sources.
//!
//! Every escrow template is a version prelude followed by the shared body.
//! The prelude defines how the deadline and counters are read for that
//! version: `deadlineReached`, `counter(box, slot)` and `sameDeadline(box)`.
//! Placeholders start with `$` and are substituted by
//! [`crate::variants::ContractResolver`].

use crate::types::ProtocolVersion;

pub const OWNER_PROGRAM: &str = "$ownerProgram";
pub const DEV_PROGRAM: &str = "$devProgram";
pub const DEV_FEE_BPS: &str = "$devFeeBps";
pub const REWARD_TOKEN_ID: &str = "$rewardTokenId";
pub const BASE_TOKEN_ID: &str = "$baseTokenId";
pub const ESCROW_PROGRAM_HASH: &str = "$escrowProgramHash";

const PRELUDE_V1_0: &str = r#"
  val deadlineReached = HEIGHT >= SELF.R4[Int].get
  val word = bigInt("18446744073709551616")
  def counter(box: Box, slot: Int): Long = {
    val packed  = box.R6[BigInt].get
    val shifted = if (slot == 0) packed else if (slot == 1) packed / word else packed / (word * word)
    (shifted % word).toLong
  }
  def sameDeadline(box: Box): Boolean = box.R4[Int].get == SELF.R4[Int].get
"#;

const PRELUDE_V1_1: &str = r#"
  val deadlineReached = HEIGHT >= SELF.R4[Int].get
  def counter(box: Box, slot: Int): Long = box.R6[Coll[Long]].get(slot)
  def sameDeadline(box: Box): Boolean = box.R4[Int].get == SELF.R4[Int].get
"#;

const PRELUDE_V2_0: &str = r#"
  val deadlineSpec = SELF.R4[(Boolean, Long)].get
  val deadlineReached =
    if (deadlineSpec._1) CONTEXT.preHeader.timestamp >= deadlineSpec._2
    else HEIGHT.toLong >= deadlineSpec._2
  def counter(box: Box, slot: Int): Long = box.R6[Coll[Long]].get(slot)
  def sameDeadline(box: Box): Boolean = box.R4[(Boolean, Long)].get == deadlineSpec
"#;

const ESCROW_HEAD: &str = r#"{
  val ownerProgram  = fromBase16("$ownerProgram")
  val devProgram    = fromBase16("$devProgram")
  val devFeeBps     = $devFeeBpsL
  val rewardTokenId = fromBase16("$rewardTokenId")
  val baseTokenId   = fromBase16("$baseTokenId")
"#;

const ESCROW_BODY: &str = r#"
  val identityTokenId = SELF.tokens(0)._1
  val minimumToRaise  = SELF.R5[Long].get
  val unitPrice       = SELF.R7[Long].get

  def tokenAmount(box: Box, id: Coll[Byte]): Long =
    box.tokens.fold(0L, { (acc: Long, t: (Coll[Byte], Long)) => if (t._1 == id) acc + t._2 else acc })

  def baseAmount(box: Box): Long =
    if (baseTokenId.size == 0) box.value else tokenAmount(box, baseTokenId)

  val sold           = counter(SELF, 0)
  val refunded       = counter(SELF, 1)
  val exchanged      = counter(SELF, 2)
  val outstanding    = sold - refunded - exchanged
  val minimumReached = sold - refunded >= minimumToRaise

  val successor = OUTPUTS(0)
  val replicated =
    successor.propositionBytes == SELF.propositionBytes &&
    successor.tokens(0)._1 == identityTokenId &&
    sameDeadline(successor) &&
    successor.R5[Long].get == minimumToRaise &&
    successor.R7[Long].get == unitPrice &&
    successor.R8[Coll[Byte]].get == SELF.R8[Coll[Byte]].get

  val deltaIdentity  = tokenAmount(SELF, identityTokenId) - tokenAmount(successor, identityTokenId)
  val deltaReward    = tokenAmount(SELF, rewardTokenId) - tokenAmount(successor, rewardTokenId)
  val deltaBase      = baseAmount(successor) - baseAmount(SELF)
  val deltaSold      = counter(successor, 0) - sold
  val deltaRefunded  = counter(successor, 1) - refunded
  val deltaExchanged = counter(successor, 2) - exchanged
  val contentKept    = successor.R9[Coll[Byte]].get == SELF.R9[Coll[Byte]].get
  val countersKept   = deltaSold == 0 && deltaRefunded == 0 && deltaExchanged == 0

  val isContribution = replicated && contentKept &&
    deltaSold > 0 && deltaRefunded == 0 && deltaExchanged == 0 &&
    deltaIdentity == deltaSold && deltaReward == 0 &&
    deltaBase == deltaSold * unitPrice &&
    (!deadlineReached || minimumReached) &&
    tokenAmount(successor, rewardTokenId) >= outstanding + deltaSold

  val isRefund = replicated && contentKept &&
    deltaRefunded > 0 && deltaSold == 0 && deltaExchanged == 0 &&
    deadlineReached && !minimumReached &&
    -deltaIdentity == deltaRefunded && deltaReward == 0 &&
    -deltaBase == deltaRefunded * unitPrice

  val isExchange = replicated && contentKept &&
    deltaExchanged > 0 && deltaSold == 0 && deltaRefunded == 0 &&
    -deltaIdentity == deltaExchanged && deltaReward == deltaExchanged && deltaBase == 0

  val isWithdrawal = minimumReached && {
    val withdrawn = if (replicated) -deltaBase else baseAmount(SELF)
    val devFee    = withdrawn * devFeeBps / 10000L
    val devPaid   = devFee == 0L || OUTPUTS.exists({ (box: Box) =>
      box.propositionBytes == devProgram && baseAmount(box) >= devFee
    })
    val ownerPaid = OUTPUTS.exists({ (box: Box) =>
      box.propositionBytes == ownerProgram && baseAmount(box) >= withdrawn - devFee
    })
    val tail =
      if (replicated) contentKept && countersKept && deltaIdentity == 0 && deltaReward == 0
      else outstanding == 0L
    withdrawn > 0L && devPaid && ownerPaid && tail
  }

  val ownerSigned = INPUTS.exists({ (box: Box) => box.propositionBytes == ownerProgram })
  val isOwnerAction = ownerSigned && replicated && countersKept &&
    deltaIdentity == 0 && deltaBase == 0 &&
    tokenAmount(successor, rewardTokenId) >= outstanding

  sigmaProp(isContribution || isRefund || isExchange || isWithdrawal || isOwnerAction)
}
"#;

const MINT: &str = r#"{
  val escrowProgramHash = fromBase16("$escrowProgramHash")
  val successor = OUTPUTS(0)
  sigmaProp(
    blake2b256(successor.propositionBytes) == escrowProgramHash &&
    successor.tokens(0) == SELF.tokens(0) &&
    successor.tokens(1) == SELF.tokens(1) &&
    successor.R5[Long].get == SELF.R5[Long].get &&
    successor.R7[Long].get == SELF.R7[Long].get &&
    successor.R8[Coll[Byte]].get == SELF.R8[Coll[Byte]].get &&
    successor.R9[Coll[Byte]].get == SELF.R9[Coll[Byte]].get
  )
}
"#;

fn prelude(version: ProtocolVersion) -> &'static str {
    match version {
        ProtocolVersion::V1_0 => PRELUDE_V1_0,
        ProtocolVersion::V1_1 => PRELUDE_V1_1,
        ProtocolVersion::V2_0 => PRELUDE_V2_0,
    }
}

/// Unsubstituted escrow source for `version`.
pub fn escrow_template(version: ProtocolVersion) -> String {
    let mut source = String::with_capacity(ESCROW_HEAD.len() + ESCROW_BODY.len() + 512);
    source.push_str(ESCROW_HEAD);
    source.push_str(prelude(version));
    source.push_str(ESCROW_BODY);
    source
}

pub fn mint_template() -> &'static str {
    MINT
}
