//! Marketplace flows
//!
//! Buy, list, cancel and offer actions are thin wrappers that build a
//! [`TransactionRequest`] and hand it to the session manager, which
//! signs through the connected agent and waits for inclusion. Reads go
//! through any [`ChainReader`].

pub mod abi;
pub mod tx;

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use tracing::info;

use crate::error::{Error, Result};
use crate::manager::WalletSessionManager;
use crate::rpc::{ChainReader, TxReceipt};
use crate::units::parse_ether;

pub use abi::{Listing, Order};
pub use tx::{MarketplaceCall, TransactionRequest};

/// Current listing for a token (inactive listings come back with `active == false`)
pub async fn fetch_listing(
    reader: &dyn ChainReader,
    marketplace: Address,
    nft: Address,
    token_id: U256,
) -> Result<Listing> {
    let data = abi::INftMarketplace::getListingCall {
        nftContract: nft,
        tokenId: token_id,
    }
    .abi_encode();
    let output = reader.call(marketplace, Bytes::from(data)).await?;
    Ok(abi::INftMarketplace::getListingCall::abi_decode_returns(&output)?)
}

/// Open offers on a token
pub async fn fetch_active_offers(
    reader: &dyn ChainReader,
    marketplace: Address,
    nft: Address,
    token_id: U256,
) -> Result<Vec<Order>> {
    let data = abi::INftMarketplace::getActiveOrdersCall {
        nftContract: nft,
        tokenId: token_id,
    }
    .abi_encode();
    let output = reader.call(marketplace, Bytes::from(data)).await?;
    Ok(abi::INftMarketplace::getActiveOrdersCall::abi_decode_returns(&output)?)
}

/// Whether `operator` may transfer every token `owner` holds in `nft`
pub async fn is_approved_for_all(
    reader: &dyn ChainReader,
    nft: Address,
    owner: Address,
    operator: Address,
) -> Result<bool> {
    let data = abi::IERC721::isApprovedForAllCall { owner, operator }.abi_encode();
    let output = reader.call(nft, Bytes::from(data)).await?;
    Ok(abi::IERC721::isApprovedForAllCall::abi_decode_returns(&output)?)
}

/// Marketplace contract bound to a wallet session
pub struct Marketplace<'a> {
    manager: &'a WalletSessionManager,
    address: Address,
}

impl<'a> Marketplace<'a> {
    pub fn new(manager: &'a WalletSessionManager, address: Address) -> Self {
        Self { manager, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// List a token for sale, granting the marketplace operator approval first if needed
    pub async fn list_nft(&self, nft: Address, token_id: U256, price: &str) -> Result<TxReceipt> {
        let price = parse_ether(price)?;
        let owner = self.session_address().await?;
        let reader = self.manager.reader().await?;

        if !is_approved_for_all(&reader, nft, owner, self.address).await? {
            info!("Approving marketplace {} as operator for {}", self.address, nft);
            self.manager
                .submit_transaction(TransactionRequest::new(
                    nft,
                    MarketplaceCall::SetApprovalForAll {
                        operator: self.address,
                        approved: true,
                    },
                ))
                .await?;
        }

        self.submit(MarketplaceCall::CreateListing {
            nft,
            token_id,
            price,
        })
        .await
    }

    /// Buy a listed token at `price`
    pub async fn buy_nft(&self, nft: Address, token_id: U256, price: &str) -> Result<TxReceipt> {
        let value = parse_ether(price)?;
        self.manager
            .submit_transaction(
                TransactionRequest::new(self.address, MarketplaceCall::BuyNow { nft, token_id })
                    .with_value(value),
            )
            .await
    }

    pub async fn cancel_listing(&self, nft: Address, token_id: U256) -> Result<TxReceipt> {
        self.submit(MarketplaceCall::CancelListing { nft, token_id })
            .await
    }

    pub async fn update_listing(
        &self,
        nft: Address,
        token_id: U256,
        new_price: &str,
    ) -> Result<TxReceipt> {
        let new_price = parse_ether(new_price)?;
        self.submit(MarketplaceCall::UpdateListing {
            nft,
            token_id,
            new_price,
        })
        .await
    }

    /// Place a direct offer, escrowing `price`
    pub async fn make_offer(&self, nft: Address, token_id: U256, price: &str) -> Result<TxReceipt> {
        let value = parse_ether(price)?;
        self.manager
            .submit_transaction(
                TransactionRequest::new(self.address, MarketplaceCall::CreateOrder { nft, token_id })
                    .with_value(value),
            )
            .await
    }

    pub async fn accept_offer(&self, order_id: U256) -> Result<TxReceipt> {
        self.submit(MarketplaceCall::AcceptOrder { order_id }).await
    }

    pub async fn cancel_offer(&self, order_id: U256) -> Result<TxReceipt> {
        self.submit(MarketplaceCall::CancelOrder { order_id }).await
    }

    pub async fn listing(&self, nft: Address, token_id: U256) -> Result<Listing> {
        let reader = self.manager.reader().await?;
        fetch_listing(&reader, self.address, nft, token_id).await
    }

    pub async fn active_offers(&self, nft: Address, token_id: U256) -> Result<Vec<Order>> {
        let reader = self.manager.reader().await?;
        fetch_active_offers(&reader, self.address, nft, token_id).await
    }

    async fn submit(&self, call: MarketplaceCall) -> Result<TxReceipt> {
        self.manager
            .submit_transaction(TransactionRequest::new(self.address, call))
            .await
    }

    async fn session_address(&self) -> Result<Address> {
        let session = self.manager.session().await;
        let address = session.address().ok_or(Error::NotConnected)?;
        address
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_string()))
    }
}
