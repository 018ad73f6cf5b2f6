//! Transaction requests for marketplace writes

use std::fmt;

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;

use super::abi::{IERC721, INftMarketplace};
use crate::error::{Error, Result};

/// A state-changing contract call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketplaceCall {
    CreateListing {
        nft: Address,
        token_id: U256,
        price: U256,
    },
    BuyNow {
        nft: Address,
        token_id: U256,
    },
    CancelListing {
        nft: Address,
        token_id: U256,
    },
    UpdateListing {
        nft: Address,
        token_id: U256,
        new_price: U256,
    },
    CreateOrder {
        nft: Address,
        token_id: U256,
    },
    AcceptOrder {
        order_id: U256,
    },
    CancelOrder {
        order_id: U256,
    },
    /// ERC-721 operator approval, sent to the NFT contract itself
    SetApprovalForAll {
        operator: Address,
        approved: bool,
    },
}

impl MarketplaceCall {
    pub fn method_name(&self) -> &'static str {
        match self {
            MarketplaceCall::CreateListing { .. } => "createListing",
            MarketplaceCall::BuyNow { .. } => "buyNow",
            MarketplaceCall::CancelListing { .. } => "cancelListing",
            MarketplaceCall::UpdateListing { .. } => "updateListing",
            MarketplaceCall::CreateOrder { .. } => "createOrder",
            MarketplaceCall::AcceptOrder { .. } => "acceptOrder",
            MarketplaceCall::CancelOrder { .. } => "cancelOrder",
            MarketplaceCall::SetApprovalForAll { .. } => "setApprovalForAll",
        }
    }

    /// Whether the method accepts attached value
    pub fn is_payable(&self) -> bool {
        matches!(
            self,
            MarketplaceCall::BuyNow { .. } | MarketplaceCall::CreateOrder { .. }
        )
    }

    /// ABI-encoded calldata
    pub fn encode(&self) -> Bytes {
        let data = match self.clone() {
            MarketplaceCall::CreateListing {
                nft,
                token_id,
                price,
            } => INftMarketplace::createListingCall {
                nftContract: nft,
                tokenId: token_id,
                price,
            }
            .abi_encode(),
            MarketplaceCall::BuyNow { nft, token_id } => INftMarketplace::buyNowCall {
                nftContract: nft,
                tokenId: token_id,
            }
            .abi_encode(),
            MarketplaceCall::CancelListing { nft, token_id } => {
                INftMarketplace::cancelListingCall {
                    nftContract: nft,
                    tokenId: token_id,
                }
                .abi_encode()
            }
            MarketplaceCall::UpdateListing {
                nft,
                token_id,
                new_price,
            } => INftMarketplace::updateListingCall {
                nftContract: nft,
                tokenId: token_id,
                newPrice: new_price,
            }
            .abi_encode(),
            MarketplaceCall::CreateOrder { nft, token_id } => INftMarketplace::createOrderCall {
                nftContract: nft,
                tokenId: token_id,
            }
            .abi_encode(),
            MarketplaceCall::AcceptOrder { order_id } => {
                INftMarketplace::acceptOrderCall { orderId: order_id }.abi_encode()
            }
            MarketplaceCall::CancelOrder { order_id } => {
                INftMarketplace::cancelOrderCall { orderId: order_id }.abi_encode()
            }
            MarketplaceCall::SetApprovalForAll { operator, approved } => {
                IERC721::setApprovalForAllCall { operator, approved }.abi_encode()
            }
        };
        Bytes::from(data)
    }
}

impl fmt::Display for MarketplaceCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketplaceCall::CreateListing { nft, token_id, .. }
            | MarketplaceCall::BuyNow { nft, token_id }
            | MarketplaceCall::CancelListing { nft, token_id }
            | MarketplaceCall::UpdateListing { nft, token_id, .. }
            | MarketplaceCall::CreateOrder { nft, token_id } => {
                write!(f, "{}({}, #{})", self.method_name(), nft, token_id)
            }
            MarketplaceCall::AcceptOrder { order_id } | MarketplaceCall::CancelOrder { order_id } => {
                write!(f, "{}(order {})", self.method_name(), order_id)
            }
            MarketplaceCall::SetApprovalForAll { operator, approved } => {
                write!(f, "{}({}, {})", self.method_name(), operator, approved)
            }
        }
    }
}

/// One contract call to submit; built per call and discarded afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub to: Address,
    pub call: MarketplaceCall,
    /// Attached native value in wei
    pub value: U256,
}

impl TransactionRequest {
    pub fn new(to: Address, call: MarketplaceCall) -> Self {
        Self {
            to,
            call,
            value: U256::ZERO,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn calldata(&self) -> Bytes {
        self.call.encode()
    }

    /// Reject value attached to a non-payable method before prompting the user
    pub fn validate(&self) -> Result<()> {
        if !self.value.is_zero() && !self.call.is_payable() {
            return Err(Error::InvalidAmount(format!(
                "{} is not payable but {} wei was attached",
                self.call.method_name(),
                self.value
            )));
        }
        Ok(())
    }
}
