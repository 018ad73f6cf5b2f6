//! Contract bindings for the marketplace and ERC-721 approvals

use alloy_sol_types::sol;

sol! {
    /// Fixed-price sale record
    #[derive(Debug, PartialEq, Eq)]
    struct Listing {
        address seller;
        uint256 price;
        uint256 createdAt;
        bool active;
    }

    /// Direct offer on a token
    #[derive(Debug, PartialEq, Eq)]
    struct Order {
        uint256 orderId;
        address nftContract;
        uint256 tokenId;
        address buyer;
        uint256 price;
        uint256 createdAt;
        bool active;
    }

    interface INftMarketplace {
        function createListing(address nftContract, uint256 tokenId, uint256 price) external;
        function buyNow(address nftContract, uint256 tokenId) external payable;
        function cancelListing(address nftContract, uint256 tokenId) external;
        function updateListing(address nftContract, uint256 tokenId, uint256 newPrice) external;
        function createOrder(address nftContract, uint256 tokenId) external payable;
        function acceptOrder(uint256 orderId) external;
        function cancelOrder(uint256 orderId) external;
        function getListing(address nftContract, uint256 tokenId) external view returns (Listing memory);
        function getActiveOrders(address nftContract, uint256 tokenId) external view returns (Order[] memory);
    }

    interface IERC721 {
        function setApprovalForAll(address operator, bool approved) external;
        function isApprovedForAll(address owner, address operator) external view returns (bool);
    }
}
